//! Remote file operations
//!
//! Copy, compare, inspect and remove directories on cluster hosts. The
//! production client shells out to `ssh` and `rsync`; the simulated one
//! only logs.

use async_trait::async_trait;
use bob_core::{BobError, RemoteDir, Result};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SshSettings;

/// Directory-level file operations on remote hosts
#[async_trait]
pub trait RemoteFileClient: Send + Sync {
    /// Copy the contents of `from` into `to`
    async fn copy(&self, from: &RemoteDir, to: &RemoteDir, cancel: &CancellationToken)
        -> Result<()>;

    /// Every file of `from` exists in `to` with the same size and checksum
    async fn source_copied_to_dest(
        &self,
        from: &RemoteDir,
        to: &RemoteDir,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Delete `dir` and everything below it
    async fn remove_dir(&self, dir: &RemoteDir, cancel: &CancellationToken) -> Result<()>;

    async fn dir_contains_files(
        &self,
        dir: &RemoteDir,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Size and checksum of one file, keyed by its path relative to the listed dir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub checksum: String,
}

const LISTING_SEPARATOR: &str = "--bob-checksums--";

/// Parse the output of [`listing_command`]
pub fn parse_listing(output: &str) -> Result<HashMap<String, FileInfo>> {
    let mut sizes = HashMap::new();
    let mut checksums = HashMap::new();
    let mut in_checksums = false;

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        if line == LISTING_SEPARATOR {
            in_checksums = true;
            continue;
        }

        if in_checksums {
            // sha256sum prints "<hash>  <path>"
            let (hash, path) = line
                .split_once("  ")
                .ok_or_else(|| BobError::Operation(format!("Bad checksum line: {}", line)))?;
            checksums.insert(normalize_relative(path), hash.to_string());
        } else {
            let (size, path) = line
                .split_once(' ')
                .ok_or_else(|| BobError::Operation(format!("Bad size line: {}", line)))?;
            let size: u64 = size
                .parse()
                .map_err(|_| BobError::Operation(format!("Bad file size: {}", line)))?;
            sizes.insert(normalize_relative(path), size);
        }
    }

    sizes
        .into_iter()
        .map(|(path, size)| {
            let checksum = checksums
                .remove(&path)
                .ok_or_else(|| BobError::Operation(format!("No checksum listed for {}", path)))?;
            Ok((path, FileInfo { size, checksum }))
        })
        .collect()
}

fn normalize_relative(path: &str) -> String {
    path.trim_start_matches("./").to_string()
}

/// Every source file is present in the destination with equal size and checksum
pub fn is_subset(source: &HashMap<String, FileInfo>, dest: &HashMap<String, FileInfo>) -> bool {
    source
        .iter()
        .all(|(path, info)| dest.get(path) == Some(info))
}

/// Quote a value for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn listing_command(path: &str) -> String {
    let dir = shell_quote(path);
    format!(
        "if [ -d {dir} ]; then cd {dir} && find . -type f -printf '%s %p\\n' && echo '{sep}' && find . -type f -exec sha256sum {{}} +; fi",
        dir = dir,
        sep = LISTING_SEPARATOR
    )
}

/// `ssh`/`rsync` backed client
pub struct SshRemoteFileClient {
    settings: SshSettings,
}

impl SshRemoteFileClient {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn target(&self, address: &str) -> String {
        match &self.settings.user {
            Some(user) => format!("{}@{}", user, address),
            None => address.to_string(),
        }
    }

    fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!(
                "ConnectTimeout={}",
                self.settings.connect_timeout.as_secs().max(1)
            ),
            "-p".to_string(),
            self.settings.port.to_string(),
        ];
        if let Some(key) = &self.settings.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    /// Run a shell command on `address` and return its stdout
    async fn run(
        &self,
        address: &str,
        remote_command: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut command = Command::new("ssh");
        command
            .args(self.ssh_options())
            .arg(self.target(address))
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(address = %address, command = %remote_command, "Running remote command");

        let output = tokio::select! {
            output = command.output() => output.map_err(|e| {
                BobError::Operation(format!("Failed to spawn ssh to {}: {}", address, e))
            })?,
            _ = cancel.cancelled() => return Err(BobError::Cancelled),
        };

        if !output.status.success() {
            return Err(BobError::Operation(format!(
                "Command on {} exited with {}: {}",
                address,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn list_files(
        &self,
        dir: &RemoteDir,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, FileInfo>> {
        let output = self
            .run(&dir.address, &listing_command(&dir.path), cancel)
            .await?;
        parse_listing(&output)
    }
}

#[async_trait]
impl RemoteFileClient for SshRemoteFileClient {
    #[instrument(skip(self, cancel), fields(from = %from, to = %to))]
    async fn copy(
        &self,
        from: &RemoteDir,
        to: &RemoteDir,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mkdir = format!("mkdir -p {}", shell_quote(&to.path));
        self.run(&to.address, &mkdir, cancel).await?;

        let source = shell_quote(&format!("{}/", from.path.trim_end_matches('/')));
        let rsync = if from.address == to.address {
            format!(
                "rsync -a {} {}",
                source,
                shell_quote(&format!("{}/", to.path.trim_end_matches('/')))
            )
        } else {
            let ssh = format!("ssh {}", self.ssh_options().join(" "));
            format!(
                "rsync -a -e {} {} {}",
                shell_quote(&ssh),
                source,
                shell_quote(&format!(
                    "{}:{}/",
                    self.target(&to.address),
                    to.path.trim_end_matches('/')
                ))
            )
        };

        self.run(&from.address, &rsync, cancel).await?;
        info!(from = %from, to = %to, "Directory copied");
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(from = %from, to = %to))]
    async fn source_copied_to_dest(
        &self,
        from: &RemoteDir,
        to: &RemoteDir,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let source = self.list_files(from, cancel).await?;
        let dest = self.list_files(to, cancel).await?;

        let contained = is_subset(&source, &dest);
        if !contained {
            warn!(
                from = %from,
                to = %to,
                source_files = source.len(),
                dest_files = dest.len(),
                "Destination does not contain all source files"
            );
        }
        Ok(contained)
    }

    #[instrument(skip(self, cancel), fields(dir = %dir))]
    async fn remove_dir(&self, dir: &RemoteDir, cancel: &CancellationToken) -> Result<()> {
        let path = dir.path.trim_end_matches('/');
        if path.is_empty() {
            return Err(BobError::Operation(format!("Refusing to remove {}", dir)));
        }
        self.run(&dir.address, &format!("rm -rf {}", shell_quote(path)), cancel)
            .await?;
        info!(dir = %dir, "Directory removed");
        Ok(())
    }

    async fn dir_contains_files(
        &self,
        dir: &RemoteDir,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let depth = if recursive { "" } else { " -maxdepth 1" };
        let command = format!(
            "if [ -d {dir} ]; then find {dir}{depth} -type f -print -quit; fi",
            dir = shell_quote(&dir.path),
            depth = depth
        );
        let output = self.run(&dir.address, &command, cancel).await?;
        Ok(!output.trim().is_empty())
    }
}

/// Log-only client for test mode
#[derive(Debug, Default)]
pub struct SimulatedRemoteFileClient;

#[async_trait]
impl RemoteFileClient for SimulatedRemoteFileClient {
    async fn copy(
        &self,
        from: &RemoteDir,
        to: &RemoteDir,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BobError::Cancelled);
        }
        info!(from = %from, to = %to, "Would copy directory");
        Ok(())
    }

    async fn source_copied_to_dest(
        &self,
        from: &RemoteDir,
        to: &RemoteDir,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        info!(from = %from, to = %to, "Would compare directories");
        Ok(true)
    }

    async fn remove_dir(&self, dir: &RemoteDir, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BobError::Cancelled);
        }
        info!(dir = %dir, "Would remove directory");
        Ok(())
    }

    async fn dir_contains_files(
        &self,
        dir: &RemoteDir,
        _recursive: bool,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        debug!(dir = %dir, "Simulated emptiness check");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: u64, checksum: &str) -> FileInfo {
        FileInfo {
            size,
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn test_parse_listing() {
        let output = "12 ./blob/1.blob\n3 ./index\n--bob-checksums--\naaa  ./blob/1.blob\nbbb  ./index\n";
        let files = parse_listing(output).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files["blob/1.blob"], info(12, "aaa"));
        assert_eq!(files["index"], info(3, "bbb"));
    }

    #[test]
    fn test_parse_listing_empty() {
        assert!(parse_listing("").unwrap().is_empty());
        assert!(parse_listing("--bob-checksums--\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_listing_missing_checksum() {
        let output = "12 ./a\n--bob-checksums--\n";
        assert!(parse_listing(output).is_err());
    }

    #[test]
    fn test_is_subset() {
        let source: HashMap<_, _> = [("a".to_string(), info(1, "x"))].into_iter().collect();
        let mut dest = source.clone();
        dest.insert("b".to_string(), info(2, "y"));

        assert!(is_subset(&source, &dest));
        assert!(!is_subset(&dest, &source));

        let changed: HashMap<_, _> = [("a".to_string(), info(1, "z"))].into_iter().collect();
        assert!(!is_subset(&source, &changed));
        assert!(is_subset(&HashMap::new(), &changed));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/mnt/disk1"), "'/mnt/disk1'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_ssh_target_and_options() {
        let client = SshRemoteFileClient::new(SshSettings {
            user: Some("bob".to_string()),
            port: 2222,
            key_path: Some("/root/.ssh/id_bob".into()),
            ..Default::default()
        });

        assert_eq!(client.target("10.0.0.1"), "bob@10.0.0.1");
        let options = client.ssh_options();
        assert!(options.contains(&"2222".to_string()));
        assert!(options.contains(&"/root/.ssh/id_bob".to_string()));
    }

    #[tokio::test]
    async fn test_simulated_client() {
        let client = SimulatedRemoteFileClient;
        let cancel = CancellationToken::new();
        let dir = RemoteDir::new("10.0.0.1", "/mnt/disk1/bob/1");

        assert!(!client.dir_contains_files(&dir, true, &cancel).await.unwrap());
        assert!(client
            .source_copied_to_dest(&dir, &dir, &cancel)
            .await
            .unwrap());
        assert!(client.copy(&dir, &dir, &cancel).await.is_ok());

        cancel.cancel();
        assert!(matches!(
            client.remove_dir(&dir, &cancel).await,
            Err(BobError::Cancelled)
        ));
    }
}
