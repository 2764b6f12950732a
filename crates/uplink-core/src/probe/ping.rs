//! ICMP echo prober.
//!
//! Pings the configured anchor address through a specific interface and
//! classifies the uplink by packet-loss ratio. The socket is pinned to
//! the source interface with `SO_BINDTODEVICE`, so replies prove that the
//! probed uplink itself can reach the anchor, not just that some route
//! exists.
//!
//! An unprivileged `SOCK_DGRAM`/`IPPROTO_ICMP` socket is tried first
//! (kernel demuxes echo replies by identifier); when that is unavailable
//! the prober falls back to `SOCK_RAW`, which requires `CAP_NET_RAW` —
//! the daemon already needs it to reprogram routes.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{LinkStatus, Prober};
use crate::config::ProbeConfig;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;
const ECHO_PAYLOAD_LEN: usize = 24;

/// Probes reachability with ICMP echo requests.
pub struct PingProber {
    cfg: ProbeConfig,
}

impl PingProber {
    pub fn new(cfg: ProbeConfig) -> Self {
        PingProber { cfg }
    }

    /// Runs one probe round and returns the observed loss ratio in [0, 1].
    fn run_round(&self, iface: &str) -> io::Result<f64> {
        let sock = IcmpSocket::open(iface)?;
        let ident = (unsafe { libc::getpid() } & 0xffff) as u16;
        let deadline = Instant::now() + self.cfg.duration();
        let mut sent: u32 = 0;
        let mut received: u32 = 0;
        let mut seq: u16 = 0;

        loop {
            let round_start = Instant::now();
            if round_start >= deadline {
                break;
            }
            let packet = build_echo_request(ident, seq);
            sock.send_to(&packet, self.cfg.probe_anchor)?;
            sent += 1;
            if sock.await_reply(ident, seq, self.cfg.timeout())? {
                received += 1;
            }
            seq = seq.wrapping_add(1);

            let next = round_start + self.cfg.interval();
            if next >= deadline {
                break;
            }
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
        }

        if sent == 0 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "probe round ended before any echo was sent",
            ));
        }
        Ok(1.0 - f64::from(received) / f64::from(sent))
    }
}

impl Prober for PingProber {
    fn probe(&self, iface: &str) -> LinkStatus {
        match self.run_round(iface) {
            Ok(loss) => {
                let status = classify(loss * 100.0, self.cfg.probe_loss_threshold_pct);
                debug!(
                    iface = %iface,
                    loss_pct = loss * 100.0,
                    status = status.as_str(),
                    "probe round finished"
                );
                status
            }
            Err(err) => {
                debug!(iface = %iface, error = %err, "probe could not complete");
                LinkStatus::Unknown
            }
        }
    }
}

/// Maps a loss percentage to a health status.
fn classify(loss_pct: f64, threshold_pct: f64) -> LinkStatus {
    if loss_pct <= threshold_pct {
        LinkStatus::Healthy
    } else {
        LinkStatus::Unhealthy
    }
}

/// An ICMP socket bound to one interface.
struct IcmpSocket {
    fd: RawFd,
    raw: bool,
}

impl IcmpSocket {
    fn open(iface: &str) -> io::Result<Self> {
        let (fd, raw) = unsafe {
            let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_ICMP);
            if fd >= 0 {
                (fd, false)
            } else {
                let fd = libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_ICMP);
                if fd < 0 {
                    return Err(io::Error::last_os_error());
                }
                (fd, true)
            }
        };
        let sock = IcmpSocket { fd, raw };

        let ret = unsafe {
            libc::setsockopt(
                sock.fd,
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                iface.as_ptr() as *const libc::c_void,
                iface.len() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }

    fn send_to(&self, packet: &[u8], dst: Ipv4Addr) -> io::Result<()> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from_ne_bytes(dst.octets());
        let ret = unsafe {
            libc::sendto(
                self.fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
                0,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits up to `timeout` for the echo reply matching `seq`.
    ///
    /// Returns `Ok(false)` on timeout. Unrelated ICMP traffic arriving on
    /// a raw socket is skipped without consuming the verdict.
    fn await_reply(&self, ident: u16, seq: u16, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pfd, 1, remaining.as_millis() as libc::c_int) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ret == 0 {
                return Ok(false);
            }

            let mut buf = [0u8; 512];
            let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            let n = n as usize;

            // Raw sockets deliver the IP header; dgram sockets strip it.
            let icmp = if self.raw {
                if n < 20 {
                    continue;
                }
                let ihl = usize::from(buf[0] & 0x0f) * 4;
                if n <= ihl {
                    continue;
                }
                &buf[ihl..n]
            } else {
                &buf[..n]
            };

            // Dgram-ICMP sockets rewrite the identifier on the wire, so it
            // only disambiguates on raw sockets.
            let want_ident = if self.raw { Some(ident) } else { None };
            if is_matching_reply(icmp, want_ident, seq) {
                return Ok(true);
            }
        }
    }
}

impl Drop for IcmpSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn build_echo_request(ident: u16, seq: u16) -> [u8; ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN] {
    let mut pkt = [0u8; ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN];
    pkt[0] = ICMP_ECHO_REQUEST;
    pkt[4..6].copy_from_slice(&ident.to_be_bytes());
    pkt[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, byte) in pkt[ICMP_HEADER_LEN..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    let sum = checksum(&pkt);
    pkt[2..4].copy_from_slice(&sum.to_be_bytes());
    pkt
}

/// RFC 1071 Internet checksum.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum += u32::from(byte) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn is_matching_reply(icmp: &[u8], ident: Option<u16>, seq: u16) -> bool {
    if icmp.len() < ICMP_HEADER_LEN || icmp[0] != ICMP_ECHO_REPLY {
        return false;
    }
    if let Some(id) = ident {
        if u16::from_be_bytes([icmp[4], icmp[5]]) != id {
            return false;
        }
    }
    u16::from_be_bytes([icmp[6], icmp[7]]) == seq
}
