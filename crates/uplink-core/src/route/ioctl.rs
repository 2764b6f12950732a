//! Default-route programming through the legacy routing ioctls.
//!
//! Routes are described with a `struct rtentry` and handed to the kernel
//! via `SIOCADDRT`/`SIOCDELRT` on a plain `AF_INET` datagram socket. A
//! default route always carries destination 0.0.0.0, netmask 0.0.0.0 and
//! `RTF_UP | RTF_GATEWAY`.
//!
//! `metric` here is the kernel-internal value: the kernel subtracts one
//! before storing it, and `/proc/net/route` shows the stored value, so
//! callers promote a `/proc` metric with `+ 1` before calling in.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::Ipv4Addr;

use tracing::debug;

enum RouteOp {
    Add,
    Delete,
}

pub(super) fn add_default_route(if_name: &str, metric: i32, gw: Ipv4Addr) -> io::Result<()> {
    modify_default_route(RouteOp::Add, if_name, metric, gw)
}

pub(super) fn delete_default_route(if_name: &str, metric: i32, gw: Ipv4Addr) -> io::Result<()> {
    modify_default_route(RouteOp::Delete, if_name, metric, gw)
}

fn modify_default_route(op: RouteOp, if_name: &str, metric: i32, gw: Ipv4Addr) -> io::Result<()> {
    let if_name_c = CString::new(if_name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;

    let mut route: libc::rtentry = unsafe { mem::zeroed() };

    // Destination and netmask of a default route are both 0.0.0.0; the
    // zeroed struct already has the right addresses, only the families
    // need setting.
    let dst = unsafe { &mut *(&mut route.rt_dst as *mut libc::sockaddr as *mut libc::sockaddr_in) };
    dst.sin_family = libc::AF_INET as libc::sa_family_t;
    let mask =
        unsafe { &mut *(&mut route.rt_genmask as *mut libc::sockaddr as *mut libc::sockaddr_in) };
    mask.sin_family = libc::AF_INET as libc::sa_family_t;

    // The gateway must be reachable from the selected interface.
    let gw_sa =
        unsafe { &mut *(&mut route.rt_gateway as *mut libc::sockaddr as *mut libc::sockaddr_in) };
    gw_sa.sin_family = libc::AF_INET as libc::sa_family_t;
    gw_sa.sin_addr.s_addr = u32::from_ne_bytes(gw.octets());

    route.rt_metric = metric as libc::c_short;
    route.rt_flags = libc::RTF_UP | libc::RTF_GATEWAY;
    route.rt_dev = if_name_c.as_ptr() as *mut libc::c_char;

    let (name, req) = match op {
        RouteOp::Add => ("SIOCADDRT", libc::SIOCADDRT),
        RouteOp::Delete => ("SIOCDELRT", libc::SIOCDELRT),
    };
    debug!(op = name, iface = %if_name, metric, gw = %gw, "routing ioctl");

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::ioctl(fd, req, &route as *const libc::rtentry) };
    let result = if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    };
    unsafe {
        libc::close(fd);
    }
    result
}
