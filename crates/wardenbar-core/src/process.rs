//! Process queries

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Check if a process with the given pid is alive
pub fn is_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_unlikely_pid_is_dead() {
        assert!(!is_alive(u32::MAX - 7));
    }
}
