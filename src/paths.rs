use std::path::PathBuf;

/// Per-VM work directory: `~/.local/share/tartboot/<vm-name>/`
pub fn work_dir(vm_name: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tartboot")
        .join(vm_name)
}

/// Directory holding `tartboot.log` and the captured `tart run` output logs.
pub fn logs_dir(vm_name: &str) -> PathBuf {
    work_dir(vm_name).join("logs")
}
