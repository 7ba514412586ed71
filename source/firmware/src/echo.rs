use crate::channel::Handler;

/// Answers each message with a copy of itself, with the case of ASCII letters
/// swapped.
///
/// Replies longer than the outgoing buffer are truncated.
#[derive(Debug, Default, Copy, Clone)]
pub struct CaseSwap;

impl Handler for CaseSwap {
    fn handle(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        let len = input.len().min(output.len());
        for (out, &byte) in output.iter_mut().zip(&input[..len]) {
            *out = swap_case(byte);
        }
        len
    }
}

#[inline]
const fn swap_case(byte: u8) -> u8 {
    if byte.is_ascii_alphabetic() {
        byte ^ 0x20
    } else {
        byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{prop_assert_eq, proptest};

    #[test]
    fn swaps_letters_only() {
        let mut out = [0u8; 16];
        let n = CaseSwap.handle(b"Test 42!", &mut out);
        assert_eq!(&out[..n], b"tEST 42!");
    }

    #[test]
    fn truncates_to_output() {
        let mut out = [0u8; 3];
        let n = CaseSwap.handle(b"abcdef", &mut out);
        assert_eq!(n, 3);
        assert_eq!(&out, b"ABC");
    }

    proptest! {
        #[test]
        fn swapping_twice_is_identity(input: Vec<u8>) {
            let mut once = vec![0; input.len()];
            let mut twice = vec![0; input.len()];
            CaseSwap.handle(&input, &mut once);
            CaseSwap.handle(&once, &mut twice);
            prop_assert_eq!(twice, input);
        }
    }
}
