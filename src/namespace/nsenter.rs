use std::io;
use std::path::Path;

/// Moves the calling thread into the network namespace at `path`
/// (typically `/var/run/netns/<name>`).
///
/// Membership is per thread. Call it before any other thread is spawned so
/// that every thread created afterwards inherits the namespace. Requires
/// `CAP_SYS_ADMIN`.
#[cfg(target_os = "linux")]
pub fn enter_net_namespace(path: &Path) -> io::Result<()> {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    let handle = File::open(path)?;
    let rc = unsafe { libc::setns(handle.as_raw_fd(), libc::CLONE_NEWNET) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    log::debug!("Entered network namespace {}", path.display());
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn enter_net_namespace(path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("network namespaces are not supported here ({})", path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_namespace_handle() {
        let err = enter_net_namespace(Path::new("/nonexistent/netns/red")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[ignore = "requires CAP_SYS_ADMIN"]
    fn test_enter_own_namespace() {
        std::thread::spawn(|| enter_net_namespace(Path::new("/proc/self/ns/net")))
            .join()
            .unwrap()
            .unwrap();
    }
}
