//! Session titles.
//!
//! A session starts with a marker such as
//!
//! ```text
//! # tracing calculate call (thread 4711) at 2024-03-01 10:22:33.123
//! # id <Executor 12 at host1:30003>, parent <Executor 9 at host1:30003> pop4
//! ```
//!
//! which is listed as `sub host1:30003.9.12 at 2024-03-01 10:22:33.123`.

use crate::Result;

use regex::Regex;

pub struct TitleRewriter {
    call: Regex,
    plan_id: Regex,
}

fn abbreviate(method: &str) -> &str {
    match method {
        "calculate" => "cal",
        "executePop" => "pop",
        "popArgs" => "arg",
        other => other,
    }
}

impl TitleRewriter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // 1: method, 2: thread
            call: Regex::new(r"^(calculate|executePop|popArgs) call \(thread (\d+)\) at ")?,
            // 1: executor, 2: server, 3: parent executor, 4: parent server, 5: parent pop
            plan_id: Regex::new(
                r"^# id (?:<Executor |<?plan_?)(\d+)(?: at |@)([^:>]+:\d+)>?(?:, parent (?:<Executor |<?plan_?)(\d+)(?: at |@)([^:>]+:\d+)>?(?: pop(\d+))?)?",
            )?,
        })
    }

    /// Title for a session whose marker line (without `# tracing `) is
    /// `title` and whose second line is `next_line`. Unrecognized titles are
    /// returned unchanged.
    pub fn rewrite(&self, title: &str, next_line: &str) -> String {
        let Some(call) = self.call.captures(title) else {
            return title.to_string();
        };
        let Some(id) = self.plan_id.captures(next_line.trim_end()) else {
            return title.to_string();
        };
        let method = abbreviate(&call[1]);
        let when = &title[call.get(0).map_or(0, |m| m.end())..];
        let executor = &id[1];
        let server = &id[2];

        match (method, id.get(3), id.get(4)) {
            ("cal", Some(parent), Some(parent_server)) => {
                let (parent, parent_server) = (parent.as_str(), parent_server.as_str());
                if parent_server == server {
                    format!("sub {}.{}.{} at {}", parent_server, parent, executor, when)
                } else {
                    format!(
                        "sub {}.{}.{}.{} at {}",
                        parent_server, parent, server, executor, when
                    )
                }
            }
            _ => format!("{} {}.{} at {}", method, server, executor, when),
        }
    }
}
