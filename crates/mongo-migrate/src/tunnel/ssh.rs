use core::net::{Ipv4Addr, SocketAddr};
use std::{
    io::{BufRead, BufReader},
    net::TcpStream,
    os::unix::process::CommandExt,
    process::{Child, Stdio},
    thread,
};

use tracing::{error, info, warn};

use crate::{
    Config,
    config::SshConfig,
    runner::{CommandLine, ProbeError, run_with_timeout},
};

use super::{EstablishError, ProcTable, ProcessFinder, TunnelControl, TunnelHandle};

/// A tunnel made by `ssh -L`.
pub struct SshTunnel<F: ProcessFinder = ProcTable> {
    ssh: SshConfig,
    local_port: u16,
    remote_port: u16,
    finder: F,
    child: Option<Child>,
}

impl<F: ProcessFinder> SshTunnel<F> {
    /// Create a tunnel controller for the configured host.
    pub fn new(config: &Config, finder: F) -> Self {
        Self {
            ssh: config.ssh.clone(),
            local_port: config.mongodb.local_tunnel_port,
            remote_port: config.mongodb.remote_port,
            finder,
            child: None,
        }
    }

    /// The command that checks the host accepts a connection.
    pub fn connectivity_command(&self) -> CommandLine {
        CommandLine::new(&self.ssh.program)
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.ssh.connect_timeout_seconds))
            .args(["-o", "StrictHostKeyChecking=no", "-o", "BatchMode=yes"])
            .arg(self.ssh.principal())
            .arg("echo 'SSH connection test successful'")
    }

    /// The command that forwards the local port to the remote port.
    pub fn forward_command(&self) -> CommandLine {
        CommandLine::new(&self.ssh.program)
            .args(["-4", "-N"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "BatchMode=yes"])
            .arg("-L")
            .arg(format!("{}:localhost:{}", self.local_port, self.remote_port))
            .arg(self.ssh.principal())
    }

    /// Wait for the tunnel to settle then check the local port accepts connections.
    fn await_ready(&mut self) -> Result<(), EstablishError> {
        thread::sleep(self.ssh.tunnel_settle());

        if let Some(child) = self.child.as_mut() {
            if let Some(status) = child.try_wait().map_err(EstablishError::Wait)? {
                return Err(EstablishError::Exited(status.code()));
            }
        }

        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port));
        TcpStream::connect_timeout(&address, self.ssh.probe_timeout())
            .map_err(|error| EstablishError::Unreachable(self.local_port, error))?;

        Ok(())
    }

    /// Stop and reap the tunnel process this controller started.
    fn stop_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        if let Err(error) = child.kill() {
            warn!("Could not kill tunnel process {}: {error}", child.id());
        }
        if let Err(error) = child.wait() {
            warn!("Could not reap tunnel process {}: {error}", child.id());
        }
    }

    /// Terminate every tunnel process for the host, including ones left by earlier runs.
    fn sweep(&self) {
        let pids = match self.finder.find(&self.ssh.program, &self.ssh.host) {
            Ok(pids) => pids,
            Err(error) => {
                warn!("Could not list processes to sweep: {error}");
                return;
            }
        };

        for pid in pids {
            match self.finder.terminate(pid) {
                Ok(()) => info!("Terminated tunnel process {pid}"),
                Err(error) => warn!("Could not terminate tunnel process {pid}: {error}"),
            }
        }
    }
}

impl<F: ProcessFinder> TunnelControl for SshTunnel<F> {
    fn check_connectivity(&mut self) -> bool {
        info!("Testing SSH connection to {}", self.ssh.principal());

        match run_with_timeout(&self.connectivity_command(), self.ssh.check_timeout()) {
            Ok(_) => {
                info!("SSH connection test succeeded");
                true
            }
            Err(ProbeError::TimedOut(timeout)) => {
                error!("SSH connection test timed out after {timeout:?}");
                false
            }
            Err(error @ ProbeError::Exited { .. }) => {
                error!("SSH connection test failed: {error}");
                false
            }
            Err(error) => {
                error!("Error during SSH connection test: {error}");
                false
            }
        }
    }

    fn establish(&mut self) -> Result<TunnelHandle, EstablishError> {
        info!(
            "Opening SSH tunnel localhost:{} -> {}:{}",
            self.local_port, self.ssh.host, self.remote_port
        );

        // Own process group, a Ctrl+C at the terminal must not close the tunnel before teardown.
        let mut child = self
            .forward_command()
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(EstablishError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    warn!("[ssh] {line}");
                }
            });
        }

        let handle = TunnelHandle {
            pid: child.id(),
            local_port: self.local_port,
            host: self.ssh.host.clone(),
            remote_port: self.remote_port,
        };
        self.child = Some(child);

        if let Err(error) = self.await_ready() {
            self.stop_child();
            return Err(error);
        }

        info!("SSH tunnel is open and reachable: {handle}");

        Ok(handle)
    }

    fn teardown(&mut self, handle: Option<TunnelHandle>) {
        match &handle {
            Some(handle) => info!("Closing SSH tunnel {handle}"),
            None => info!("Cleaning up SSH tunnels to {}", self.ssh.host),
        }

        self.stop_child();
        self.sweep();

        // Let the OS release the process and port.
        thread::sleep(self.ssh.teardown_settle());
    }
}

impl<F: ProcessFinder> Drop for SshTunnel<F> {
    fn drop(&mut self) {
        self.stop_child();
    }
}
