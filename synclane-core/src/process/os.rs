use super::ConnectorProcess;
use std::io::{self, Read, Write};
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// [`ConnectorProcess`] over a spawned OS child
#[derive(Debug)]
pub struct OsProcess {
    child: Child,
    exit_code: Option<i32>,
}

impl OsProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            exit_code: None,
        }
    }

    fn poll(&mut self) -> io::Result<Option<i32>> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }
        if let Some(status) = self.child.try_wait()? {
            self.exit_code = Some(exit_code(status));
        }
        Ok(self.exit_code)
    }
}

/// Exit code, with signal deaths reported as 128 + signal like a shell does
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

impl ConnectorProcess for OsProcess {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.poll()? {
                return Ok(Some(code));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.poll()?.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }
}
