use std::sync::Mutex;

use crate::command::{CommandFuture, CommandOutput, CommandRunner, CommandSpec};
use crate::error::CommandError;

type Respond = dyn Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync;

/// Runner that answers every command with a closure and records the calls.
pub struct FnRunner {
    respond: Box<Respond>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FnRunner {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FnRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> CommandFuture<'a> {
        self.calls.lock().unwrap().push(spec.clone());
        let result = (self.respond)(spec);
        Box::pin(async move { result })
    }
}

pub fn ok() -> Result<CommandOutput, CommandError> {
    Ok(CommandOutput {
        exit_code: Some(0),
        ..Default::default()
    })
}

pub fn exit(code: i32, stderr: &str) -> Result<CommandOutput, CommandError> {
    Ok(CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}
