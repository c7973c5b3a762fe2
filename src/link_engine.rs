//! Raw link-layer (AF_PACKET) transport between processes on different hosts.
//!
//! Grounded on `original_source/include/socketEngine.h`: a raw, non-blocking
//! `AF_PACKET`/`SOCK_RAW` socket bound to one interface, learning that
//! interface's MAC address via `SIOCGIFHWADDR`. `libc` is used directly for
//! the syscalls `socket2` does not expose (raw packet sockets, `ioctl`).

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use parking_lot::Mutex;

use tracing::{debug, info, trace, warn};

use crate::error::CoreError;
use crate::types::{LinkAddress, MAC_LEN, MTU};

const ETH_P_ALL: u16 = 0x0003;

#[repr(C)]
#[derive(Clone, Copy)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_hwaddr: libc::sockaddr,
}

/// A raw Ethernet-frame socket bound to one host interface.
pub struct LinkEngine {
    fd: Mutex<Option<OwnedFd>>,
    if_index: i32,
    mac_address: LinkAddress,
    interface_name: String,
}

impl LinkEngine {
    /// Opens, configures non-blocking, and binds the raw socket. Mirrors
    /// `SocketEngine::setUpSocket()`'s five steps.
    pub fn start(interface_name: &str) -> Result<Self, CoreError> {
        trace!("LinkEngine::start({interface_name})");
        unsafe {
            let raw_fd = libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (ETH_P_ALL as u16).to_be() as i32,
            );
            if raw_fd < 0 {
                return Err(CoreError::TransportDown(format!(
                    "socket(AF_PACKET): {}",
                    io::Error::last_os_error()
                )));
            }
            let fd = OwnedFd::from_raw_fd(raw_fd);

            let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0);
            if flags == -1 || libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
                return Err(CoreError::TransportDown(format!(
                    "fcntl O_NONBLOCK: {}",
                    io::Error::last_os_error()
                )));
            }

            let mut ifr: IfReq = mem::zeroed();
            let name_bytes = interface_name.as_bytes();
            let len = name_bytes.len().min(libc::IFNAMSIZ - 1);
            for i in 0..len {
                ifr.ifr_name[i] = name_bytes[i] as libc::c_char;
            }

            if libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFINDEX, &mut ifr) < 0 {
                return Err(CoreError::TransportDown(format!(
                    "ioctl SIOCGIFINDEX: {}",
                    io::Error::last_os_error()
                )));
            }
            #[repr(C)]
            struct IfReqIndex {
                ifr_name: [libc::c_char; libc::IFNAMSIZ],
                ifr_ifindex: libc::c_int,
            }
            let ifr_index: &IfReqIndex = mem::transmute(&ifr);
            let if_index = ifr_index.ifr_ifindex;

            if libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFHWADDR, &mut ifr) < 0 {
                return Err(CoreError::TransportDown(format!(
                    "ioctl SIOCGIFHWADDR: {}",
                    io::Error::last_os_error()
                )));
            }
            let mut mac = [0u8; MAC_LEN];
            let sa_data = &ifr.ifr_hwaddr.sa_data;
            for i in 0..MAC_LEN {
                mac[i] = sa_data[i] as u8;
            }

            let mut sll: libc::sockaddr_ll = mem::zeroed();
            sll.sll_family = libc::AF_PACKET as u16;
            sll.sll_protocol = (ETH_P_ALL as u16).to_be();
            sll.sll_ifindex = if_index;
            let sll_ptr = &sll as *const libc::sockaddr_ll as *const libc::sockaddr;
            if libc::bind(fd.as_raw_fd(), sll_ptr, mem::size_of::<libc::sockaddr_ll>() as u32) < 0 {
                return Err(CoreError::TransportDown(format!(
                    "bind: {}",
                    io::Error::last_os_error()
                )));
            }

            info!(interface = interface_name, mac = %LinkAddress(mac), "link engine bound");
            Ok(LinkEngine {
                fd: Mutex::new(Some(fd)),
                if_index,
                mac_address: LinkAddress(mac),
                interface_name: interface_name.to_string(),
            })
        }
    }

    pub fn mac_address(&self) -> LinkAddress {
        self.mac_address
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// File descriptor the [`Interface`](crate::interface::Interface) event
    /// loop multiplexes on for readability.
    pub fn notification_fd(&self) -> RawFd {
        self.fd.lock().as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1)
    }

    /// Transmits `frame[..size]` as-is; the caller has already built the full
    /// link header.
    pub fn send(&self, frame: &[u8]) -> Result<usize, CoreError> {
        let guard = self.fd.lock();
        let fd = guard.as_ref().ok_or_else(|| CoreError::TransportDown("engine not started".into()))?;
        let n = unsafe {
            libc::send(
                fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(CoreError::TransportDown(format!("send: {err}")));
        }
        Ok(n as usize)
    }

    /// Non-blocking read of one frame into `out`. Returns `Ok(0)` on "no
    /// data available", matching the spec's "not an error" rule for
    /// would-block reads.
    pub fn receive(&self, out: &mut [u8; MTU]) -> Result<usize, CoreError> {
        let guard = self.fd.lock();
        let fd = guard.as_ref().ok_or_else(|| CoreError::TransportDown("engine not started".into()))?;
        let n = unsafe {
            libc::recv(
                fd.as_raw_fd(),
                out.as_mut_ptr() as *mut libc::c_void,
                out.len(),
                0,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(CoreError::TransportDown(format!("recv: {err}")));
        }
        debug!(bytes = n, "link engine received frame");
        Ok(n as usize)
    }

    pub fn stop(&self) {
        if let Some(fd) = self.fd.lock().take() {
            drop(fd);
            warn!(interface = %self.interface_name, if_index = self.if_index, "link engine stopped");
        }
    }
}

impl Drop for LinkEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// `send`/`receive` only issue read-only syscalls against the held fd through
// `&self`; the kernel serializes concurrent use of one socket fd itself.
unsafe impl Sync for LinkEngine {}
