use std::ptr::NonNull;

use vring::{DescFlags, DriverRing, Layout, RingError, UsedElem, Vring};

#[repr(C, align(4096))]
struct Page([u8; 4096]);

struct Shared {
    mem: Vec<Page>,
    layout: Layout,
}

impl Shared {
    fn new(num: u32, align: u32) -> Self {
        let layout = Layout::new(num, align).unwrap();
        let pages = (layout.size() + 4095) / 4096;
        Self {
            mem: (0..pages).map(|_| Page([0; 4096])).collect(),
            layout,
        }
    }

    fn base(&mut self) -> NonNull<u8> {
        NonNull::new(self.mem.as_mut_ptr().cast::<u8>()).unwrap()
    }

    fn rings(&mut self) -> (DriverRing, Vring) {
        let base = self.base();
        let host = unsafe { DriverRing::new(base, self.layout) }.unwrap();
        let device = unsafe { Vring::new(base, self.layout) }.unwrap();
        (host, device)
    }
}

#[test]
fn host_offers_device_returns_shorter() {
    const A: u64 = 0x8c00_0000;

    let mut shared = Shared::new(4, 0x1000);
    let (mut host, mut device) = shared.rings();

    host.add_buffer(0, A, 10, DescFlags::new()).unwrap();

    let buf = device.get_buffer().unwrap().unwrap();
    assert_eq!(buf.addr(), A);
    assert_eq!(buf.len(), 10);

    device.put_buffer(A, 8).unwrap();
    assert_eq!(device.used_idx(), 1);
    assert_eq!(host.take_used(), Ok(Some(UsedElem { id: 0, len: 8 })));
    assert_eq!(host.take_used(), Ok(None));
}

#[test]
fn device_fills_host_buffers() {
    let mut shared = Shared::new(4, 0x1000);
    let (mut host, mut device) = shared.rings();

    let mut bufs = [[0u8; 32]; 4];
    for (id, buf) in bufs.iter_mut().enumerate() {
        let flags = DescFlags::new().with(DescFlags::WRITE, true);
        host.add_buffer(id as u16, buf.as_mut_ptr() as u64, 32, flags)
            .unwrap();
    }
    assert_eq!(host.offer(0), Err(RingError::Full));

    let mut n = 0u8;
    while let Some(buf) = device.get_buffer().unwrap() {
        assert!(buf.is_device_writable());
        let msg = [b'a' + n; 3];
        let dst = unsafe { core::slice::from_raw_parts_mut(buf.addr() as *mut u8, buf.len() as usize) };
        dst[..msg.len()].copy_from_slice(&msg);
        device.put_buffer(buf.addr(), msg.len() as u32).unwrap();
        n += 1;
    }
    assert_eq!(n, 4);

    let mut got = Vec::new();
    while let Some(used) = host.take_used().unwrap() {
        got.push(bufs[used.id as usize][..used.len as usize].to_vec());
    }
    assert_eq!(got, vec![b"aaa".to_vec(), b"bbb".to_vec(), b"ccc".to_vec(), b"ddd".to_vec()]);
}

#[test]
fn misaligned_base_is_rejected() {
    let mut shared = Shared::new(4, 0x1000);
    let base = shared.base();
    let off = unsafe { NonNull::new_unchecked(base.as_ptr().add(0x10)) };
    let err = unsafe { Vring::new(off, shared.layout) }.unwrap_err();
    assert_eq!(err, vring::ConfigError::MisalignedBase(off.as_ptr() as usize));
}
