//! Shell sessions

use hb_protocol::{ScriptInfo, ScriptRequest, ServerHandleId, ShellId};

use crate::server::ServerHandle;

/// Execution state of a shell's script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShellState {
    /// Nothing has been run yet
    #[default]
    Idle,
    /// Script sent to the transport
    Executing,
    /// Last run succeeded
    Finished,
    /// Last run failed
    Failed,
}

/// An interactive script session bound to its own Secondary server handle
#[derive(Debug, Clone)]
pub struct ShellSession {
    id: ShellId,
    server: ServerHandleId,
    script: ScriptInfo,
    state: ShellState,
}

impl ShellSession {
    pub fn new(id: ShellId, server: ServerHandleId, script: ScriptInfo) -> Self {
        Self {
            id,
            server,
            script,
            state: ShellState::Idle,
        }
    }

    pub fn id(&self) -> ShellId {
        self.id
    }

    /// The Secondary server this shell runs on
    pub fn server(&self) -> ServerHandleId {
        self.server
    }

    pub fn script(&self) -> &ScriptInfo {
        &self.script
    }

    pub fn title(&self) -> &str {
        &self.script.title
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Send the script to `server` if it is marked for auto-execution.
    ///
    /// Returns whether anything was sent.
    pub fn execute(&mut self, server: &mut ServerHandle) -> bool {
        if !self.script.execute {
            return false;
        }

        let database = if self.script.database.is_empty() {
            server.settings().default_database.clone()
        } else {
            self.script.database.clone()
        };

        tracing::debug!("Executing script of {} on {}", self.id, server.id());
        server.execute(ScriptRequest {
            shell: self.id,
            script: self.script.script.clone(),
            database,
        });
        self.state = ShellState::Executing;
        true
    }

    /// Record the outcome of a script run
    pub fn finish(&mut self, error: Option<&str>) {
        self.state = match error {
            Some(e) => {
                tracing::warn!("Script of {} failed: {}", self.id, e);
                ShellState::Failed
            }
            None => ShellState::Finished,
        };
    }
}

/// Build a query against `collection` that survives reserved and odd names
pub fn build_collection_query(collection: &str, postfix: &str) -> String {
    format!(
        "db.getCollection('{}').{}",
        collection.replace('\\', "\\\\"),
        postfix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_collection_query() {
        assert_eq!(
            build_collection_query("users", "find({})"),
            "db.getCollection('users').find({})"
        );
        assert_eq!(
            build_collection_query(r"odd\name", "find({})"),
            r"db.getCollection('odd\\name').find({})"
        );
    }

    #[test]
    fn test_finish_updates_state() {
        let mut shell = ShellSession::new(
            ShellId::new(1),
            ServerHandleId::new(2),
            ScriptInfo::new("db.stats()").titled("admin"),
        );
        assert_eq!(shell.state(), ShellState::Idle);
        assert_eq!(shell.title(), "admin");

        shell.finish(Some("boom"));
        assert_eq!(shell.state(), ShellState::Failed);

        shell.finish(None);
        assert_eq!(shell.state(), ShellState::Finished);
    }
}
