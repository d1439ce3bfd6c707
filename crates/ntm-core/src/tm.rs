// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin wrapper over the terminal-multiplexer binary (C1).
//!
//! One capability interface per collaboration: [`TmuxTransport`] picks local
//! vs. remote execution, [`TmAdapter`] exposes the handful of tmux
//! subcommands the rest of NTM needs. Pane target format is always
//! `"<session>:<window>.<pane>"`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::ErrorKind;

/// A boxed, `Send` future — the object-safe shape used by [`PaneOps`] so
/// callers can hold it behind `Arc<dyn PaneOps>` and swap in a mock for tests.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Narrow capability interface for the pane operations the Limit Detector,
/// Prompt Injector, and Auto-Respawner need. The default implementation is
/// [`TmAdapter`]; tests inject a mock.
pub trait PaneOps: Send + Sync {
    fn capture_pane(&self, target: &str, lines: u32) -> BoxFuture<'_, anyhow::Result<String>>;
    fn send_keys(&self, target: &str, keys: &str, enter: bool) -> BoxFuture<'_, anyhow::Result<()>>;
    fn paste_keys(&self, target: &str, text: &str) -> BoxFuture<'_, anyhow::Result<()>>;
    fn pane_pid(&self, target: &str) -> BoxFuture<'_, anyhow::Result<u32>>;
}

/// How tmux commands are actually executed: on this host, or via a remote shell.
pub trait TmuxTransport: Send + Sync {
    /// Build a fresh `tmux` invocation (or whatever wraps it), ready for `.args(...)`.
    fn command(&self) -> tokio::process::Command;
}

/// Runs `tmux` directly on the local host.
pub struct LocalTransport;

impl TmuxTransport for LocalTransport {
    fn command(&self) -> tokio::process::Command {
        tokio::process::Command::new("tmux")
    }
}

/// Runs `tmux` on a remote host by wrapping the same argv in `ssh user@host -- tmux ...`.
pub struct SshTransport {
    pub destination: String,
}

impl SshTransport {
    pub fn new(destination: impl Into<String>) -> Self {
        Self { destination: destination.into() }
    }
}

impl TmuxTransport for SshTransport {
    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg(&self.destination).arg("--").arg("tmux");
        cmd
    }
}

/// Thin wrapper exposing the tmux operations the rest of NTM needs.
pub struct TmAdapter<T: TmuxTransport> {
    transport: T,
}

impl<T: TmuxTransport> TmAdapter<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = self
            .transport
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| anyhow::Error::new(e).context(ErrorKind::TransientIO))?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "tmux {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            )
            .context(ErrorKind::TransientIO));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `new-session -d -s <name> -c <dir>`.
    pub async fn create_session(&self, name: &str, dir: &Path) -> anyhow::Result<()> {
        let dir = dir.to_string_lossy();
        self.run(&["new-session", "-d", "-s", name, "-c", &dir]).await.map(|_| ())
    }

    /// `split-window` targeting the given session/window.
    pub async fn split_window(&self, target: &str, dir: Option<&Path>) -> anyhow::Result<()> {
        let dir_string = dir.map(|d| d.to_string_lossy().into_owned());
        let mut args = vec!["split-window", "-t", target];
        if let Some(ref d) = dir_string {
            args.push("-c");
            args.push(d);
        }
        self.run(&args).await.map(|_| ())
    }

    /// `select-layout tiled` on the given target.
    pub async fn select_layout_tiled(&self, target: &str) -> anyhow::Result<()> {
        self.run(&["select-layout", "-t", target, "tiled"]).await.map(|_| ())
    }

    /// `select-pane -T <title> -t <target>`.
    pub async fn set_title(&self, target: &str, title: &str) -> anyhow::Result<()> {
        self.run(&["select-pane", "-T", title, "-t", target]).await.map(|_| ())
    }

    /// `send-keys -t <target> <keys> [Enter]`.
    pub async fn send_keys(&self, target: &str, keys: &str, enter: bool) -> anyhow::Result<()> {
        let mut args = vec!["send-keys", "-t", target, keys];
        if enter {
            args.push("Enter");
        }
        self.run(&args).await.map(|_| ())
    }

    /// `load-buffer -b <tmp> && paste-buffer -t <target>`, handling multi-line
    /// text atomically by round-tripping it through a scratch file.
    pub async fn paste_keys(&self, target: &str, text: &str) -> anyhow::Result<()> {
        let buffer_name = format!("ntm-{}", uuid::Uuid::new_v4().simple());
        let scratch = std::env::temp_dir().join(&buffer_name);
        tokio::fs::write(&scratch, text)
            .await
            .map_err(|e| anyhow::Error::new(e).context(ErrorKind::TransientIO))?;

        let scratch_path = scratch.to_string_lossy().into_owned();
        let result = async {
            self.run(&["load-buffer", "-b", &buffer_name, &scratch_path]).await?;
            self.run(&["paste-buffer", "-d", "-b", &buffer_name, "-t", target]).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&scratch).await;
        result
    }

    /// `capture-pane -p -t <target> -S -<n>`.
    pub async fn capture_pane(&self, target: &str, lines: u32) -> anyhow::Result<String> {
        let start = format!("-{lines}");
        self.run(&["capture-pane", "-p", "-t", target, "-S", &start]).await
    }

    /// `list-panes -F "<format>"` for the given session.
    pub async fn list_panes(&self, session: &str, format: &str) -> anyhow::Result<Vec<String>> {
        let output = self.run(&["list-panes", "-t", session, "-F", format]).await?;
        Ok(output.lines().map(str::to_owned).collect())
    }

    /// `display-message -p -t <target> "#{pane_pid}"`.
    pub async fn pane_pid(&self, target: &str) -> anyhow::Result<u32> {
        let output = self.run(&["display-message", "-p", "-t", target, "#{pane_pid}"]).await?;
        output
            .trim()
            .parse()
            .map_err(|e| anyhow::Error::new(e).context(ErrorKind::TransientIO))
    }

    /// `kill-session -t <name>`.
    pub async fn kill_session(&self, name: &str) -> anyhow::Result<()> {
        self.run(&["kill-session", "-t", name]).await.map(|_| ())
    }

    /// Pane width/height via `list-panes`, used for geometry verification.
    pub async fn pane_geometry(&self, session: &str) -> anyhow::Result<Vec<(u32, u32)>> {
        let lines = self
            .list_panes(session, "#{pane_width}x#{pane_height}")
            .await?;
        Ok(lines
            .iter()
            .filter_map(|l| {
                let (w, h) = l.split_once('x')?;
                Some((w.parse().ok()?, h.parse().ok()?))
            })
            .collect())
    }
}

impl<T: TmuxTransport + 'static> PaneOps for TmAdapter<T> {
    fn capture_pane(&self, target: &str, lines: u32) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async move { TmAdapter::capture_pane(self, target, lines).await })
    }

    fn send_keys(&self, target: &str, keys: &str, enter: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { TmAdapter::send_keys(self, target, keys, enter).await })
    }

    fn paste_keys(&self, target: &str, text: &str) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { TmAdapter::paste_keys(self, target, text).await })
    }

    fn pane_pid(&self, target: &str) -> BoxFuture<'_, anyhow::Result<u32>> {
        Box::pin(async move { TmAdapter::pane_pid(self, target).await })
    }
}

#[cfg(test)]
#[path = "tm_tests.rs"]
mod tests;
