use std::path::PathBuf;

/// Fresh, empty directory under the system temp dir, unique per test tag.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("frame-sentry-{}-{tag}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Shell command that runs `script` through `sh -c`.
pub fn sh(script: &str) -> crate::command::ExternalCommand {
    crate::command::ExternalCommand::new("sh", ["-c".to_string(), script.to_string()])
}
