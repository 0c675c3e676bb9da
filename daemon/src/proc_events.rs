//! Kernel process-lifecycle events via the netlink proc connector.
//!
//! Subscribing to the `CN_IDX_PROC` multicast group requires CAP_NET_ADMIN;
//! [`ProcEventSource::open`] surfaces that as
//! [`EventSourceError::PermissionDenied`] so the caller can fall back to
//! polling instead of dying. Once subscribed, the socket delivers a datagram
//! per fork/exec/exit in the system; only exec and exit are surfaced here.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::trace;

/// Netlink connector id for process events.
const CN_IDX_PROC: u32 = 1;
const CN_VAL_PROC: u32 = 1;

/// proc_cn_mcast_op values.
const PROC_CN_MCAST_LISTEN: u32 = 1;
const PROC_CN_MCAST_IGNORE: u32 = 2;

/// proc_event.what values we surface.
const PROC_EVENT_EXEC: u32 = 0x0000_0002;
const PROC_EVENT_EXIT: u32 = 0x8000_0000;

/// Wire layout: struct nlmsghdr, then struct cn_msg, then struct proc_event.
const NLMSG_HDRLEN: usize = 16;
const CN_MSG_LEN: usize = 20;
/// Offset of the event_data union within proc_event (after what, cpu and
/// the 64-bit timestamp).
const EVENT_DATA_OFFSET: usize = 16;

/// Events drained per wake before yielding back to the loop, so a fork bomb
/// cannot starve the rest of the cycle. Remaining datagrams are picked up on
/// the next wake.
pub const MAX_EVENTS_PER_WAKE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcEvent {
    Exec { pid: i32 },
    Exit { pid: i32 },
}

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("process event subscription requires CAP_NET_ADMIN")]
    PermissionDenied,
    #[error("netlink setup failed: {0}")]
    Io(#[from] io::Error),
}

fn classify(err: io::Error) -> EventSourceError {
    match err.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EACCES) => EventSourceError::PermissionDenied,
        _ => EventSourceError::Io(err),
    }
}

pub struct ProcEventSource {
    fd: AsyncFd<OwnedFd>,
}

impl ProcEventSource {
    /// Opens a non-blocking netlink connector socket, binds it to the proc
    /// multicast group and sends the LISTEN subscription.
    pub fn open() -> Result<Self, EventSourceError> {
        let raw = unsafe {
            libc::socket(
                libc::PF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                libc::NETLINK_CONNECTOR,
            )
        };
        if raw < 0 {
            return Err(classify(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = CN_IDX_PROC;
        addr.nl_pid = std::process::id();
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(classify(io::Error::last_os_error()));
        }

        let message = mcast_message(PROC_CN_MCAST_LISTEN);
        let sent =
            unsafe { libc::send(fd.as_raw_fd(), message.as_ptr().cast(), message.len(), 0) };
        if sent < 0 {
            return Err(classify(io::Error::last_os_error()));
        }

        let fd = AsyncFd::with_interest(fd, Interest::READABLE).map_err(EventSourceError::Io)?;
        Ok(Self { fd })
    }

    /// Waits until at least one event is pending, then drains datagrams
    /// without blocking, bounded at `max` events.
    pub async fn next_batch(&mut self, max: usize) -> io::Result<Vec<ProcEvent>> {
        loop {
            let mut guard = self.fd.readable().await?;
            let mut events = Vec::new();
            let mut buf = [0u8; 8192];

            loop {
                let n = unsafe {
                    libc::recv(
                        self.fd.get_ref().as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        libc::MSG_DONTWAIT,
                    )
                };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::WouldBlock {
                        guard.clear_ready();
                        break;
                    }
                    // The kernel dropped messages while we were away; what we
                    // already parsed is still valid, and liveness pruning
                    // covers the gap.
                    if err.raw_os_error() == Some(libc::ENOBUFS) {
                        trace!("netlink receive queue overflowed");
                        continue;
                    }
                    return Err(err);
                }
                parse_datagram(&buf[..n as usize], &mut events);
                if events.len() >= max {
                    break;
                }
            }

            if !events.is_empty() {
                return Ok(events);
            }
            // Woke for datagrams we do not surface (forks, acks); wait again.
        }
    }
}

impl Drop for ProcEventSource {
    fn drop(&mut self) {
        // Best-effort unsubscribe; the kernel also drops us on close.
        let message = mcast_message(PROC_CN_MCAST_IGNORE);
        let _ = unsafe {
            libc::send(
                self.fd.get_ref().as_raw_fd(),
                message.as_ptr().cast(),
                message.len(),
                libc::MSG_DONTWAIT,
            )
        };
    }
}

/// Builds the nlmsghdr + cn_msg + proc_cn_mcast_op subscription datagram.
fn mcast_message(op: u32) -> Vec<u8> {
    let total = NLMSG_HDRLEN + CN_MSG_LEN + mem::size_of::<u32>();
    let mut buf = Vec::with_capacity(total);
    // struct nlmsghdr
    buf.extend_from_slice(&(total as u32).to_ne_bytes());
    buf.extend_from_slice(&(libc::NLMSG_DONE as u16).to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // nlmsg_flags
    buf.extend_from_slice(&0u32.to_ne_bytes()); // nlmsg_seq
    buf.extend_from_slice(&std::process::id().to_ne_bytes());
    // struct cn_msg
    buf.extend_from_slice(&CN_IDX_PROC.to_ne_bytes());
    buf.extend_from_slice(&CN_VAL_PROC.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // seq
    buf.extend_from_slice(&0u32.to_ne_bytes()); // ack
    buf.extend_from_slice(&(mem::size_of::<u32>() as u16).to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // flags
    // proc_cn_mcast_op
    buf.extend_from_slice(&op.to_ne_bytes());
    buf
}

/// Parses one datagram, which may carry several nlmsghdr-framed connector
/// messages; exec and exit events are appended to `events`, everything else
/// is skipped.
fn parse_datagram(buf: &[u8], events: &mut Vec<ProcEvent>) {
    let mut offset = 0;
    while buf.len() >= offset + NLMSG_HDRLEN {
        let msg_len = read_u32(buf, offset) as usize;
        if msg_len < NLMSG_HDRLEN || offset + msg_len > buf.len() {
            break;
        }
        let msg_type = read_u16(buf, offset + 4);
        if msg_type == libc::NLMSG_DONE as u16 {
            if let Some(event) =
                parse_connector_payload(&buf[offset + NLMSG_HDRLEN..offset + msg_len])
            {
                events.push(event);
            }
        }
        offset += nlmsg_align(msg_len);
    }
}

/// Extracts a proc_event from a cn_msg payload, if it is one we surface.
fn parse_connector_payload(payload: &[u8]) -> Option<ProcEvent> {
    if payload.len() < CN_MSG_LEN + EVENT_DATA_OFFSET + 4 {
        return None;
    }
    if read_u32(payload, 0) != CN_IDX_PROC || read_u32(payload, 4) != CN_VAL_PROC {
        return None;
    }

    let event = &payload[CN_MSG_LEN..];
    let what = read_u32(event, 0);
    // Both exec and exit lead event_data with process_pid.
    let pid = read_u32(event, EVENT_DATA_OFFSET) as i32;
    match what {
        PROC_EVENT_EXEC => Some(ProcEvent::Exec { pid }),
        PROC_EVENT_EXIT => Some(ProcEvent::Exit { pid }),
        _ => None,
    }
}

fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a connector datagram the way the kernel frames it.
    fn datagram(what: u32, pid: u32) -> Vec<u8> {
        // proc_event: what, cpu, timestamp_ns, then event_data (pid, tgid,
        // and for exit the exit code/signal).
        let event_len = EVENT_DATA_OFFSET + 16;
        let total = NLMSG_HDRLEN + CN_MSG_LEN + event_len;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_ne_bytes());
        buf.extend_from_slice(&(libc::NLMSG_DONE as u16).to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());

        buf.extend_from_slice(&CN_IDX_PROC.to_ne_bytes());
        buf.extend_from_slice(&CN_VAL_PROC.to_ne_bytes());
        buf.extend_from_slice(&1u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&(event_len as u16).to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());

        buf.extend_from_slice(&what.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // cpu
        buf.extend_from_slice(&0u64.to_ne_bytes()); // timestamp_ns
        buf.extend_from_slice(&pid.to_ne_bytes()); // process_pid
        buf.extend_from_slice(&pid.to_ne_bytes()); // process_tgid
        buf.extend_from_slice(&0u64.to_ne_bytes()); // exit code/signal slot
        buf
    }

    fn parse(buf: &[u8]) -> Vec<ProcEvent> {
        let mut events = Vec::new();
        parse_datagram(buf, &mut events);
        events
    }

    #[test]
    fn parses_exec_event() {
        let events = parse(&datagram(PROC_EVENT_EXEC, 4321));
        assert_eq!(events, vec![ProcEvent::Exec { pid: 4321 }]);
    }

    #[test]
    fn parses_exit_event() {
        let events = parse(&datagram(PROC_EVENT_EXIT, 77));
        assert_eq!(events, vec![ProcEvent::Exit { pid: 77 }]);
    }

    #[test]
    fn skips_fork_events() {
        const PROC_EVENT_FORK: u32 = 0x0000_0001;
        assert!(parse(&datagram(PROC_EVENT_FORK, 9)).is_empty());
    }

    #[test]
    fn skips_subscription_ack() {
        // PROC_EVENT_NONE: the ack the kernel sends right after LISTEN.
        assert!(parse(&datagram(0, 0)).is_empty());
    }

    #[test]
    fn skips_foreign_connector_ids() {
        let mut buf = datagram(PROC_EVENT_EXEC, 1);
        // Overwrite cn_msg.id.idx with a non-proc connector index.
        buf[NLMSG_HDRLEN..NLMSG_HDRLEN + 4].copy_from_slice(&9u32.to_ne_bytes());
        assert!(parse(&buf).is_empty());
    }

    #[test]
    fn parses_multiple_messages_per_datagram() {
        let mut buf = datagram(PROC_EVENT_EXEC, 10);
        buf.extend_from_slice(&datagram(PROC_EVENT_EXIT, 11));
        let events = parse(&buf);
        assert_eq!(
            events,
            vec![ProcEvent::Exec { pid: 10 }, ProcEvent::Exit { pid: 11 }]
        );
    }

    #[test]
    fn truncated_datagram_is_dropped() {
        let buf = datagram(PROC_EVENT_EXEC, 10);
        assert!(parse(&buf[..buf.len() - 20]).is_empty());
        assert!(parse(&buf[..NLMSG_HDRLEN - 1]).is_empty());
        assert!(parse(&[]).is_empty());
    }

    #[test]
    fn mcast_message_layout() {
        let message = mcast_message(PROC_CN_MCAST_LISTEN);
        assert_eq!(message.len(), 40);
        assert_eq!(read_u32(&message, 0), 40); // nlmsg_len covers the whole frame
        assert_eq!(read_u16(&message, 4), libc::NLMSG_DONE as u16);
        assert_eq!(read_u32(&message, NLMSG_HDRLEN), CN_IDX_PROC);
        assert_eq!(read_u32(&message, NLMSG_HDRLEN + CN_MSG_LEN), PROC_CN_MCAST_LISTEN);
    }
}
