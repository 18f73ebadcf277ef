//! Operator command loop
//!
//! Runs on its own OS thread: commands such as `wait` block on the session
//! condvar, which must never happen on a runtime worker. Each command returns
//! its output as text so the table can be exercised without a terminal.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use topics_protocol::Message;
use topics_utils::{Result, TopicsError};

use crate::collab::{AgentLink, BreakpointSink};
use crate::server::ConnectionState;
use crate::session::{breakpoint_key, BreakpointEvent, BreakpointHandle, Session};

/// Default `wait` timeout when no seconds are given
pub const DEFAULT_WAIT: Duration = Duration::from_secs(60);

/// Lines of context printed with an asynchronous breakpoint notification
pub const HIT_CONTEXT_RADIUS: u32 = 3;

/// Thread resumed by `proceed` when none is named
pub const DEFAULT_THREAD: &str = "main";

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Exit,
}

impl Reply {
    fn text(s: impl Into<String>) -> Result<Reply> {
        Ok(Reply::Text(s.into()))
    }
}

type Handler = fn(&Console, &[&str]) -> Result<Reply>;

struct CommandSpec {
    name: &'static str,
    aliases: &'static [&'static str],
    usage: &'static str,
    help: &'static str,
    run: Handler,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        aliases: &["h"],
        usage: "help",
        help: "List commands",
        run: Console::cmd_help,
    },
    CommandSpec {
        name: "status",
        aliases: &[],
        usage: "status",
        help: "Show the agent connection and session state",
        run: Console::cmd_status,
    },
    CommandSpec {
        name: "sourcepath",
        aliases: &["sp"],
        usage: "sourcepath <dir>[;<dir>...]",
        help: "Add source roots used to show code context",
        run: Console::cmd_sourcepath,
    },
    CommandSpec {
        name: "enter",
        aliases: &[],
        usage: "enter <class>",
        help: "Set the class used by break and clearbreaks",
        run: Console::cmd_enter,
    },
    CommandSpec {
        name: "break",
        aliases: &["ba"],
        usage: "break [class:]<line>",
        help: "Set a breakpoint after a line",
        run: Console::cmd_break,
    },
    CommandSpec {
        name: "clearbreaks",
        aliases: &["cb"],
        usage: "clearbreaks [all|<class>|<class:line>|<line>]",
        help: "Clear breakpoints at a point, in a class, or everywhere",
        run: Console::cmd_clearbreaks,
    },
    CommandSpec {
        name: "wait",
        aliases: &[],
        usage: "wait [seconds]",
        help: "Block until a breakpoint is hit",
        run: Console::cmd_wait,
    },
    CommandSpec {
        name: "see",
        aliases: &[],
        usage: "see",
        help: "Show the current breakpoint and its code",
        run: Console::cmd_see,
    },
    CommandSpec {
        name: "inspect",
        aliases: &["i"],
        usage: "inspect [var...]",
        help: "Show locals visible at the current breakpoint",
        run: Console::cmd_inspect,
    },
    CommandSpec {
        name: "step",
        aliases: &[],
        usage: "step",
        help: "Resume the thread stopped at the current breakpoint",
        run: Console::cmd_step,
    },
    CommandSpec {
        name: "proceed",
        aliases: &["resume", "cont"],
        usage: "proceed [thread]",
        help: "Resume a suspended thread by name (default main)",
        run: Console::cmd_proceed,
    },
    CommandSpec {
        name: "dump",
        aliases: &["d"],
        usage: "dump [n]",
        help: "Show the latest (or nth previous) captured stack",
        run: Console::cmd_dump,
    },
    CommandSpec {
        name: "returns",
        aliases: &["r"],
        usage: "returns",
        help: "Show captured method return values",
        run: Console::cmd_returns,
    },
    CommandSpec {
        name: "instrument",
        aliases: &[],
        usage: "instrument <class> <method> <descriptor>",
        help: "Request class bytes for a method from the agent",
        run: Console::cmd_instrument,
    },
    CommandSpec {
        name: "detach",
        aliases: &[],
        usage: "detach",
        help: "Drop the attached agent",
        run: Console::cmd_detach,
    },
    CommandSpec {
        name: "exit",
        aliases: &["e"],
        usage: "exit",
        help: "Leave the console",
        run: Console::cmd_exit,
    },
];

fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|c| c.name == name || c.aliases.contains(&name))
}

/// Render a breakpoint hit the way it is printed to the operator
pub fn render_hit(session: &Session, event: &BreakpointEvent, radius: u32) -> String {
    let mut out = format!(
        "Breakpoint {} hit at {}:{} on thread \"{}\" ({})",
        event.breakpoint_id, event.class_name, event.line, event.thread.name, event.thread.id
    );
    if let Some(code) = session.lookup_source_line(&event.class_name, event.line, radius) {
        out.push_str("\nCode context:\n");
        out.push_str(&code);
    }
    out
}

/// The operator's view of the debugger
pub struct Console {
    session: Arc<Session>,
    link: Arc<dyn AgentLink>,
    sink: Arc<dyn BreakpointSink>,
    context_radius: u32,
}

impl Console {
    pub fn new(
        session: Arc<Session>,
        link: Arc<dyn AgentLink>,
        sink: Arc<dyn BreakpointSink>,
        context_radius: u32,
    ) -> Self {
        Self {
            session,
            link,
            sink,
            context_radius,
        }
    }

    /// Parse and run one input line
    pub fn execute(&self, line: &str) -> Reply {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Reply::Text(String::new());
        };
        let args: Vec<&str> = words.collect();
        let name = name.to_lowercase();

        let Some(command) = find_command(&name) else {
            return Reply::Text(format!("unknown command {} (try help)", name));
        };

        debug!(command = command.name, ?args, "running command");
        match (command.run)(self, &args) {
            Ok(reply) => reply,
            Err(e) => Reply::Text(format!("abort: {}", e)),
        }
    }

    /// Read commands until `exit` or end of input
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<()> {
        write!(output, "> ")?;
        output.flush()?;

        for line in input.lines() {
            let line = line?;
            match self.execute(&line) {
                Reply::Exit => break,
                Reply::Text(text) => {
                    if !text.is_empty() {
                        writeln!(output, "{}", text)?;
                    }
                }
            }
            if self.session.is_shut_down() {
                break;
            }
            write!(output, "> ")?;
            output.flush()?;
        }
        Ok(())
    }

    fn usage(name: &str) -> Result<Reply> {
        Reply::text(find_command(name).map(|c| c.usage).unwrap_or(name))
    }

    /// Current type or an error telling the operator to `enter` one
    fn entered_type(&self) -> Result<String> {
        self.session
            .current_type()
            .ok_or_else(|| TopicsError::session_state("no class entered"))
    }

    fn disable_all(&self, removed: Vec<(String, BreakpointHandle)>) -> String {
        if removed.is_empty() {
            return "No breakpoints matched".into();
        }
        let mut lines = Vec::with_capacity(removed.len());
        for (key, handle) in removed {
            if let Err(e) = self.sink.disable(&handle) {
                warn!(%key, "failed to disable breakpoint: {}", e);
            }
            lines.push(format!("Clear break at {}", key));
        }
        lines.join("\n")
    }

    fn cmd_help(&self, _args: &[&str]) -> Result<Reply> {
        let mut lines = vec!["Commands:".to_string()];
        for c in COMMANDS {
            let aliases = if c.aliases.is_empty() {
                String::new()
            } else {
                format!(" ({})", c.aliases.join(", "))
            };
            lines.push(format!("  {:<45} {}{}", c.usage, c.help, aliases));
        }
        Reply::text(lines.join("\n"))
    }

    fn cmd_status(&self, _args: &[&str]) -> Result<Reply> {
        let pid = self
            .session
            .pid()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let current = self
            .session
            .current_type()
            .unwrap_or_else(|| "-".into());
        let hit = match self.session.current_breakpoint() {
            Some(e) => format!("{}:{}", e.class_name, e.line),
            None => "-".into(),
        };

        let agent = match self.link.peer() {
            Some(peer) => format!("{} ({})", self.link.state(), peer),
            None => self.link.state().to_string(),
        };

        Reply::text(format!(
            "Agent: {}\nPid: {}\nClass: {}\nBreakpoints: {}\nStopped at: {}\nSources: {}",
            agent,
            pid,
            current,
            self.session.breakpoint_count(),
            hit,
            self.session.source_count()
        ))
    }

    fn cmd_sourcepath(&self, args: &[&str]) -> Result<Reply> {
        if args.len() != 1 {
            return Self::usage("sourcepath");
        }

        let mut lines = Vec::new();
        for root in args[0].split(';').filter(|s| !s.is_empty()) {
            match self.session.add_source_root(Path::new(root)) {
                Ok(n) => lines.push(format!("Added {} to sources ({} files)", root, n)),
                Err(_) => lines.push(format!("no path found: {}", root)),
            }
        }
        Reply::text(lines.join("\n"))
    }

    fn cmd_enter(&self, args: &[&str]) -> Result<Reply> {
        let [class_name] = args else {
            return Self::usage("enter");
        };

        self.session.set_current_type(*class_name);
        let mut out = format!("Entered {}", class_name);
        if self.session.source_file(class_name).is_none() {
            out.push_str(" (no source found)");
        }
        Reply::text(out)
    }

    fn cmd_break(&self, args: &[&str]) -> Result<Reply> {
        let [target] = args else {
            return Self::usage("break");
        };

        let (class_name, line_text) = match target.rsplit_once(':') {
            Some((class, line)) => (class.to_string(), line),
            None => (self.entered_type()?, *target),
        };
        let line: i32 = line_text
            .parse()
            .map_err(|_| TopicsError::session_state(format!("{} not a number", line_text)))?;

        let handle = self.sink.set_breakpoint(&class_name, line)?;
        self.session.register_breakpoint(handle.key(), handle);

        let mut out = format!("Breakpoint after {}:{}", class_name, line);
        if let Some(code) = self.session.lookup_source_line(&class_name, line, 1) {
            out.push_str("\nCode sample:\n");
            out.push_str(&code);
        }
        Reply::text(out)
    }

    fn cmd_clearbreaks(&self, args: &[&str]) -> Result<Reply> {
        match args {
            [] => match self.session.current_type() {
                Some(class) => {
                    let removed = self.session.clear_breakpoints(|_, h| h.class_name == class);
                    Reply::text(format!(
                        "Clear breaks from {}\n{}",
                        class,
                        self.disable_all(removed)
                    ))
                }
                None => {
                    let removed = self.session.clear_breakpoints(|_, _| true);
                    Reply::text(format!("Clear all breaks\n{}", self.disable_all(removed)))
                }
            },
            ["all"] => {
                let removed = self.session.clear_breakpoints(|_, _| true);
                Reply::text(format!("Clear all breaks\n{}", self.disable_all(removed)))
            }
            [scope] if scope.contains(':') => self.clear_key(scope),
            [scope] => match scope.parse::<i32>() {
                Ok(line) => {
                    let class = self.entered_type()?;
                    self.clear_key(&breakpoint_key(&class, line))
                }
                Err(_) => {
                    let class = scope.to_string();
                    let removed = self.session.clear_breakpoints(|_, h| h.class_name == class);
                    Reply::text(format!(
                        "Clear breaks from {}\n{}",
                        class,
                        self.disable_all(removed)
                    ))
                }
            },
            _ => Self::usage("clearbreaks"),
        }
    }

    fn clear_key(&self, key: &str) -> Result<Reply> {
        match self.session.remove_breakpoint(key) {
            Some(handle) => {
                self.sink.disable(&handle)?;
                Reply::text(format!("Clear break at {}", key))
            }
            None => Reply::text(format!("No break found at {}", key)),
        }
    }

    fn cmd_wait(&self, args: &[&str]) -> Result<Reply> {
        let timeout = match args {
            [] => DEFAULT_WAIT,
            [secs] => Duration::from_secs(
                secs.parse()
                    .map_err(|_| TopicsError::session_state(format!("{} not a number", secs)))?,
            ),
            _ => return Self::usage("wait"),
        };

        self.session.require_attached()?;
        let event = self.session.wait_for_breakpoint(timeout)?;
        Reply::text(render_hit(&self.session, &event, self.context_radius))
    }

    fn cmd_see(&self, _args: &[&str]) -> Result<Reply> {
        let Some((event, thread)) = self.session.current_with_thread() else {
            return Reply::text("No breakpoint is currently hit");
        };

        let mut out = render_hit(&self.session, &event, self.context_radius);
        out.push_str(&format!("\nThread {} ({})", thread.name, thread.id));
        for frame in &event.frames {
            out.push_str("\n\tat ");
            out.push_str(frame);
        }
        Reply::text(out)
    }

    fn require_active(&self) -> Result<()> {
        if self.link.state() != ConnectionState::Active {
            return Err(TopicsError::NotConnected);
        }
        Ok(())
    }

    fn cmd_inspect(&self, args: &[&str]) -> Result<Reply> {
        let Some(event) = self.session.current_breakpoint() else {
            return Reply::text("No breakpoint is currently hit");
        };

        if args.is_empty() {
            if event.locals.is_empty() {
                return Reply::text("No locals visible");
            }
            let lines: Vec<String> = event
                .locals
                .iter()
                .map(|l| format!("{} = {}", l.name, l.value))
                .collect();
            return Reply::text(lines.join("\n"));
        }

        let lines: Vec<String> = args
            .iter()
            .map(|name| {
                let name = name.strip_prefix("this.").unwrap_or(name);
                match event.locals.iter().find(|l| l.name == name) {
                    Some(l) => format!("{} = {}", l.name, l.value),
                    None => format!("no var for {}", name),
                }
            })
            .collect();
        Reply::text(lines.join("\n"))
    }

    fn cmd_step(&self, _args: &[&str]) -> Result<Reply> {
        self.require_active()?;
        let event = self.session.resume_current()?;
        if let Err(e) = self.link.write(Message::Resume {
            thread_id: event.thread.id,
        }) {
            self.session.restore_current(event);
            return Err(e);
        }
        Reply::text(format!(
            "Resumed thread \"{}\" from {}:{}",
            event.thread.name, event.class_name, event.line
        ))
    }

    fn cmd_proceed(&self, args: &[&str]) -> Result<Reply> {
        let name = match args {
            [] => DEFAULT_THREAD,
            [name] => *name,
            _ => return Self::usage("proceed"),
        };

        self.require_active()?;
        let Some((thread, event)) = self.session.resume_thread_named(name) else {
            return Reply::text(format!("No suspended thread named {}", name));
        };
        if let Err(e) = self.link.write(Message::Resume {
            thread_id: thread.id,
        }) {
            self.session.restore_thread(thread, event);
            return Err(e);
        }
        Reply::text(format!("Resumed thread \"{}\" ({})", thread.name, thread.id))
    }

    fn cmd_dump(&self, args: &[&str]) -> Result<Reply> {
        let back: usize = match args {
            [] => 0,
            [n] => n
                .parse()
                .map_err(|_| TopicsError::session_state(format!("{} not a number", n)))?,
            _ => return Self::usage("dump"),
        };

        let history = self.session.previous_frames();
        let Some(frames) = history.iter().rev().nth(back) else {
            return Reply::text(format!(
                "No stack captured ({} available)",
                history.len()
            ));
        };

        if frames.is_empty() {
            return Reply::text("\tNo frames");
        }
        let lines: Vec<String> = frames.iter().map(|f| format!("\tat {}", f)).collect();
        Reply::text(format!("Stack frames:\n{}", lines.join("\n")))
    }

    fn cmd_returns(&self, _args: &[&str]) -> Result<Reply> {
        let returns = self.session.returns();
        if returns.is_empty() {
            return Reply::text("No return values captured");
        }
        let lines: Vec<String> = returns
            .iter()
            .map(|r| format!("{} = {}", r.location, r.value))
            .collect();
        Reply::text(lines.join("\n"))
    }

    fn cmd_instrument(&self, args: &[&str]) -> Result<Reply> {
        match args {
            [] => match self.session.last_instrumentation() {
                Some(r) => Reply::text(format!(
                    "Last response: {}{} ({} class bytes)",
                    r.method_name, r.descriptor, r.class_len
                )),
                None => Reply::text("No instrumentation response received"),
            },
            [class_name, method_name, descriptor] => {
                self.link.write(Message::RequestMethodInstrumentation {
                    class_name: class_name.to_string(),
                    method_name: method_name.to_string(),
                    descriptor: descriptor.to_string(),
                })?;
                Reply::text(format!(
                    "Requested {}.{}{}",
                    class_name, method_name, descriptor
                ))
            }
            _ => Self::usage("instrument"),
        }
    }

    fn cmd_detach(&self, _args: &[&str]) -> Result<Reply> {
        self.link.detach()?;
        Reply::text("Detached")
    }

    fn cmd_exit(&self, _args: &[&str]) -> Result<Reply> {
        Ok(Reply::Exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::RecordingLink;
    use crate::collab::AgentBreakpointSink;
    use crate::server::ConnectionState;
    use crate::session::ThreadRef;
    use tempfile::tempdir;
    use topics_protocol::LocalVar;

    fn console() -> (Console, Arc<Session>, Arc<RecordingLink>) {
        let session = Arc::new(Session::new(8));
        let link = Arc::new(RecordingLink::active());
        let sink = Arc::new(AgentBreakpointSink::new(link.clone()));
        let console = Console::new(Arc::clone(&session), link.clone(), sink, 2);
        (console, session, link)
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(t) => t,
            Reply::Exit => panic!("unexpected exit"),
        }
    }

    fn hit(line: i32) -> BreakpointEvent {
        BreakpointEvent {
            breakpoint_id: 1,
            class_name: "com.example.Foo".into(),
            line,
            thread: ThreadRef {
                id: 17,
                name: "main".into(),
            },
            frames: vec!["com.example.Foo.bar:5".into(), "com.example.Main.main:3".into()],
            locals: vec![LocalVar::new("count", "3"), LocalVar::new("name", "\"foo\"")],
        }
    }

    #[test]
    fn test_unknown_and_empty_input() {
        let (console, _, _) = console();
        assert!(text(console.execute("frobnicate")).contains("unknown command"));
        assert_eq!(text(console.execute("   ")), "");
    }

    #[test]
    fn test_help_lists_every_command() {
        let (console, _, _) = console();
        let out = text(console.execute("help"));
        for c in COMMANDS {
            assert!(out.contains(c.usage), "missing {}", c.name);
        }
    }

    #[test]
    fn test_aliases_resolve() {
        let aliases = [
            ("sp", "sourcepath"),
            ("ba", "break"),
            ("cb", "clearbreaks"),
            ("resume", "proceed"),
            ("cont", "proceed"),
            ("i", "inspect"),
            ("r", "returns"),
            ("d", "dump"),
            ("e", "exit"),
        ];
        for (alias, name) in aliases {
            assert_eq!(find_command(alias).unwrap().name, name);
        }
    }

    #[test]
    fn test_exit() {
        let (console, _, _) = console();
        assert_eq!(console.execute("exit"), Reply::Exit);
        assert_eq!(console.execute("E"), Reply::Exit);
    }

    #[test]
    fn test_break_requires_entered_class() {
        let (console, _, link) = console();
        let out = text(console.execute("break 10"));
        assert!(out.contains("no class entered"));
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_break_and_clear_roundtrip() {
        let (console, session, link) = console();
        console.execute("enter com.example.Foo");
        assert!(text(console.execute("ba 10")).contains("com.example.Foo:10"));
        console.execute("break com.example.Bar:20");
        assert_eq!(session.breakpoint_count(), 2);
        assert!(matches!(link.sent()[0], Message::SetBreakpoint { line: 10, .. }));

        // Bare line number uses the entered class
        let out = text(console.execute("cb 10"));
        assert!(out.contains("Clear break at com.example.Foo:10"));
        assert!(matches!(
            link.sent().last(),
            Some(Message::ClearBreakpoint { .. })
        ));

        let out = text(console.execute("clearbreaks com.example.Bar:21"));
        assert!(out.contains("No break found"));

        console.execute("clearbreaks all");
        assert_eq!(session.breakpoint_count(), 0);
    }

    #[test]
    fn test_clearbreaks_without_args_uses_entered_class() {
        let (console, session, _) = console();
        console.execute("break a.A:1");
        console.execute("break b.B:1");
        console.execute("enter a.A");

        console.execute("clearbreaks");
        let remaining: Vec<String> = session.breakpoints().into_iter().map(|(k, _)| k).collect();
        assert_eq!(remaining, vec!["b.B:1".to_string()]);

        console.execute("clearbreaks b.B");
        assert_eq!(session.breakpoint_count(), 0);
    }

    #[test]
    fn test_break_rejects_bad_line() {
        let (console, _, _) = console();
        let out = text(console.execute("break a.A:x"));
        assert!(out.contains("x not a number"));
    }

    #[test]
    fn test_break_when_not_connected() {
        let (console, session, link) = console();
        *link.state.lock() = ConnectionState::AwaitingPeer;
        let out = text(console.execute("break a.A:3"));
        assert!(out.starts_with("abort:"));
        assert_eq!(session.breakpoint_count(), 0);
    }

    #[test]
    fn test_step_resumes_current_thread() {
        let (console, session, link) = console();
        session.record_breakpoint_hit(hit(5));

        let out = text(console.execute("step"));
        assert!(out.contains("Resumed thread"));
        assert_eq!(link.sent(), vec![Message::Resume { thread_id: 17 }]);
        assert!(session.current_breakpoint().is_none());

        let out = text(console.execute("step"));
        assert!(out.contains("no breakpoint"));
    }

    #[test]
    fn test_step_keeps_breakpoint_when_agent_gone() {
        let (console, session, link) = console();
        session.record_breakpoint_hit(hit(5));
        *link.state.lock() = ConnectionState::AwaitingPeer;

        assert!(text(console.execute("step")).starts_with("abort:"));
        assert!(link.sent().is_empty());
        assert_eq!(session.current_breakpoint().unwrap().thread.id, 17);
    }

    #[test]
    fn test_step_restores_breakpoint_when_write_fails() {
        let (console, session, link) = console();
        session.record_breakpoint_hit(hit(5));
        *link.fail_writes.lock() = true;

        assert!(text(console.execute("step")).starts_with("abort:"));
        assert_eq!(session.current_breakpoint().unwrap().line, 5);
        assert_eq!(session.suspended_threads().len(), 1);
    }

    #[test]
    fn test_proceed_resumes_thread_by_name() {
        let (console, session, link) = console();
        let mut worker = hit(9);
        worker.thread = ThreadRef {
            id: 40,
            name: "worker".into(),
        };
        session.record_breakpoint_hit(hit(5));
        session.record_breakpoint_hit(worker);

        // Defaults to main, which is not the current hit
        let out = text(console.execute("proceed"));
        assert!(out.contains("\"main\" (17)"));
        assert_eq!(link.sent(), vec![Message::Resume { thread_id: 17 }]);
        assert_eq!(session.current_breakpoint().unwrap().thread.id, 40);

        console.execute("cont worker");
        assert_eq!(link.sent().last(), Some(&Message::Resume { thread_id: 40 }));
        assert!(session.current_breakpoint().is_none());

        assert!(text(console.execute("resume worker")).contains("No suspended thread"));
    }

    #[test]
    fn test_proceed_restores_thread_when_write_fails() {
        let (console, session, link) = console();
        session.record_breakpoint_hit(hit(5));
        *link.fail_writes.lock() = true;

        assert!(text(console.execute("proceed main")).starts_with("abort:"));
        assert_eq!(session.suspended_threads().len(), 1);
        assert!(session.current_breakpoint().is_some());
    }

    #[test]
    fn test_inspect_locals() {
        let (console, session, _) = console();
        assert!(text(console.execute("inspect")).contains("No breakpoint"));

        session.record_breakpoint_hit(hit(5));
        let out = text(console.execute("i"));
        assert_eq!(out, "count = 3\nname = \"foo\"");

        let out = text(console.execute("inspect this.count missing"));
        assert_eq!(out, "count = 3\nno var for missing");
    }

    #[test]
    fn test_see_shows_frames_and_code() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("com").join("example");
        std::fs::create_dir_all(&pkg).unwrap();
        let body: String = (1..=9).map(|i| format!("stmt{};\n", i)).collect();
        std::fs::write(pkg.join("Foo.java"), body).unwrap();

        let (console, session, _) = console();
        console.execute(&format!("sourcepath {}", dir.path().display()));
        assert!(text(console.execute("see")).contains("No breakpoint"));

        session.record_breakpoint_hit(hit(5));
        let out = text(console.execute("see"));
        assert!(out.contains("com.example.Foo:5"));
        assert!(out.contains(">    5 stmt5;"));
        assert!(out.contains("at com.example.Main.main:3"));
    }

    #[test]
    fn test_wait_requires_agent() {
        let (console, _, _) = console();
        assert!(text(console.execute("wait 1")).contains("no agent attached"));
    }

    #[test]
    fn test_wait_with_huge_timeout_does_not_panic() {
        let (console, session, _) = console();
        session.set_pid(1);
        session.record_breakpoint_hit(hit(5));
        let out = text(console.execute("wait 18446744073709551615"));
        assert!(out.contains("Breakpoint 1 hit"));
    }

    #[test]
    fn test_wait_returns_hit() {
        let (console, session, _) = console();
        session.set_pid(42);
        session.record_breakpoint_hit(hit(5));
        assert!(text(console.execute("wait 1")).contains("Breakpoint 1 hit"));
    }

    #[test]
    fn test_dump_history() {
        let (console, session, _) = console();
        assert!(text(console.execute("dump")).contains("No stack captured"));

        session.record_breakpoint_hit(hit(5));
        let mut second = hit(6);
        second.frames = vec!["com.example.Foo.baz:6".into()];
        session.record_breakpoint_hit(second);

        assert!(text(console.execute("dump")).contains("Foo.baz:6"));
        assert!(text(console.execute("dump 1")).contains("Foo.bar:5"));
        assert!(text(console.execute("dump 2")).contains("2 available"));
    }

    #[test]
    fn test_returns_listing() {
        let (console, session, _) = console();
        session.record_return(crate::session::MethodReturn {
            location: "Foo.bar()".into(),
            value: "42".into(),
        });
        assert_eq!(text(console.execute("returns")), "Foo.bar() = 42");
        assert_eq!(text(console.execute("r")), "Foo.bar() = 42");
    }

    #[test]
    fn test_instrument_sends_request() {
        let (console, _, link) = console();
        console.execute("instrument com.example.Foo bar ()V");
        assert_eq!(
            link.sent(),
            vec![Message::RequestMethodInstrumentation {
                class_name: "com.example.Foo".into(),
                method_name: "bar".into(),
                descriptor: "()V".into(),
            }]
        );
        assert!(text(console.execute("instrument a b")).starts_with("instrument <class>"));
    }

    #[test]
    fn test_detach_and_status() {
        let (console, session, link) = console();
        session.set_pid(9);
        *link.peer.lock() = Some("127.0.0.1:41000".parse().unwrap());
        let status = text(console.execute("status"));
        assert!(status.contains("Pid: 9"));
        assert!(status.contains("Agent: active (127.0.0.1:41000)"));

        assert_eq!(text(console.execute("detach")), "Detached");
        assert!(*link.detached.lock());
        assert!(text(console.execute("status")).contains("Agent: awaiting agent\n"));
        assert!(text(console.execute("detach")).starts_with("abort:"));
    }

    #[test]
    fn test_run_loop_stops_at_exit() {
        let (console, session, _) = console();
        let input = b"enter a.B\nexit\nenter c.D\n".as_slice();
        let mut output = Vec::new();
        console.run(input, &mut output).unwrap();

        assert_eq!(session.current_type().as_deref(), Some("a.B"));
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Entered a.B"));
    }
}
