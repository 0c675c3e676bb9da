//! V4L2 device-busy probe.
//!
//! Opens the device node read-only and non-blocking, then issues a zero-count
//! `VIDIOC_REQBUFS`. A driver that is currently streaming to another process
//! refuses the request with EBUSY; every other outcome, including failure to
//! open the node at all, reads as "not busy". The fd is released before
//! returning, so the probe never contends with the real consumer.

use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::trace;

/// _IOWR('V', 8, struct v4l2_requestbuffers) — the struct is 20 bytes in
/// every kernel ABI revision, so the request number is stable.
const VIDIOC_REQBUFS: libc::c_ulong = 0xC014_5608;
const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 2;

#[repr(C)]
struct V4l2RequestBuffers {
    count: u32,
    buf_type: u32,
    memory: u32,
    reserved: [u32; 2],
}

/// True iff `device` is currently claimed by a streaming consumer.
pub fn device_busy(device: &Path) -> bool {
    let file = match std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(device)
    {
        Ok(file) => file,
        // Missing or locked node: treated as idle, retried next cycle.
        Err(e) => {
            trace!(device = %device.display(), error = %e, "device open failed");
            return false;
        }
    };

    let mut request = V4l2RequestBuffers {
        count: 0,
        buf_type: V4L2_BUF_TYPE_VIDEO_CAPTURE,
        memory: V4L2_MEMORY_MMAP,
        reserved: [0; 2],
    };
    let ret = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            VIDIOC_REQBUFS,
            &mut request as *mut V4l2RequestBuffers,
        )
    };
    let busy = ret < 0
        && std::io::Error::last_os_error().raw_os_error() == Some(libc::EBUSY);
    trace!(device = %device.display(), busy, "device probed");
    busy
}
