//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ferric_utils::Sender;
use ferric_utils::task::Task;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Notify;
use tracing::{Instrument, debug_span};

use crate::config::{ApiEncoder, ApiProcessCfg};
use crate::debug::Debug;
use crate::error::IoError;
use crate::neighbor::fsm;
use crate::tasks::messages::input::{ApiCommandMsg, ApiExitMsg};

//
// API process supervisor.
//
// Each configured helper process is spawned with piped stdin/stdout. The
// reactor streams structured events into stdin (through a bounded backlog
// that drops oldest on overflow, so a stalled consumer can never stall the
// reactor) and receives newline-terminated command lines from stdout.
//
#[derive(Debug, Default)]
pub struct ApiSupervisor {
    children: Vec<ApiChild>,
}

#[derive(Debug)]
struct ApiChild {
    cfg: ApiProcessCfg,
    queue: EventQueue,
    // Whether command acknowledgments are delivered to this child.
    ack: bool,
    process: Option<Child>,
    _reader: Option<Task<()>>,
    _writer: Option<Task<()>>,
}

// Bounded event backlog shared between the reactor and a child's stdin
// writer task.
#[derive(Clone, Debug)]
pub struct EventQueue {
    lines: Arc<Mutex<VecDeque<String>>>,
    notify: Arc<Notify>,
    cap: usize,
    dropped: Arc<AtomicU64>,
}

// Structured events forwarded to the API processes.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ApiEvent {
    PeerUp {
        peer: IpAddr,
        identifier: Ipv4Addr,
        holdtime: u16,
    },
    PeerDown {
        peer: IpAddr,
        reason: Option<String>,
    },
    PeerStateChange {
        peer: IpAddr,
        old_state: fsm::State,
        new_state: fsm::State,
    },
    UpdateRx {
        peer: IpAddr,
        announced: Vec<String>,
        withdrawn: Vec<String>,
    },
    UpdateTx {
        peer: IpAddr,
        announced: Vec<String>,
        withdrawn: Vec<String>,
    },
    NotificationRx {
        peer: IpAddr,
        code: u8,
        subcode: u8,
    },
    NotificationTx {
        peer: IpAddr,
        code: u8,
        subcode: u8,
    },
    Operational {
        peer: IpAddr,
        code: u16,
    },
    Eor {
        peer: IpAddr,
        family: String,
    },
    CommandResult {
        ok: bool,
        message: String,
    },
    RibEntry {
        peer: IpAddr,
        direction: &'static str,
        family: String,
        nlri: String,
        nexthop: Option<IpAddr>,
    },
    Shutdown,
}

// ===== impl ApiSupervisor =====

impl ApiSupervisor {
    // Spawns every configured API process.
    pub(crate) fn start(
        &mut self,
        configs: &[ApiProcessCfg],
        api_commandp: &Sender<ApiCommandMsg>,
        api_exitp: &Sender<ApiExitMsg>,
    ) {
        for cfg in configs {
            match ApiChild::spawn(cfg.clone(), api_commandp, api_exitp) {
                Ok(child) => self.children.push(child),
                Err(error) => IoError::ApiSpawnError(error).log(),
            }
        }
    }

    // Restarts a child that exited, when configured to respawn; drops it
    // otherwise.
    pub(crate) fn child_exited(
        &mut self,
        name: &str,
        api_commandp: &Sender<ApiCommandMsg>,
        api_exitp: &Sender<ApiExitMsg>,
    ) {
        Debug::ApiProcessExit(name).log();

        let Some(pos) =
            self.children.iter().position(|child| child.cfg.name == name)
        else {
            return;
        };
        let child = self.children.remove(pos);
        if child.cfg.respawn {
            match ApiChild::spawn(child.cfg.clone(), api_commandp, api_exitp) {
                Ok(child) => self.children.push(child),
                Err(error) => IoError::ApiSpawnError(error).log(),
            }
        }
    }

    // Delivers an event to every API process.
    pub(crate) fn emit(&mut self, event: &ApiEvent) {
        for child in &mut self.children {
            child.deliver(event);
        }
    }

    // Delivers an event to a single API process (command responses go back
    // to the stream that issued the command).
    pub(crate) fn emit_to(&mut self, name: &str, event: &ApiEvent) {
        if let Some(child) =
            self.children.iter_mut().find(|child| child.cfg.name == name)
        {
            child.deliver(event);
        }
    }

    // Updates the acknowledgment mode of a child's stream.
    pub(crate) fn set_ack(&mut self, name: &str, enabled: bool) {
        if let Some(child) =
            self.children.iter_mut().find(|child| child.cfg.name == name)
        {
            child.ack = enabled;
        }
    }

    // Whether command acknowledgments are delivered to the child.
    pub(crate) fn ack_enabled(&self, name: &str) -> bool {
        self.children
            .iter()
            .find(|child| child.cfg.name == name)
            .is_none_or(|child| child.ack)
    }

    // Closes all children's event streams.
    pub(crate) fn shutdown(&mut self) {
        self.emit(&ApiEvent::Shutdown);
        self.children.clear();
    }
}

// ===== impl ApiChild =====

impl ApiChild {
    fn spawn(
        cfg: ApiProcessCfg,
        api_commandp: &Sender<ApiCommandMsg>,
        api_exitp: &Sender<ApiExitMsg>,
    ) -> Result<ApiChild, std::io::Error> {
        let span = debug_span!("api", name = %cfg.name);
        let _span_guard = span.enter();

        let mut process = Command::new("sh")
            .arg("-c")
            .arg(&cfg.run)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Debug::ApiProcessSpawn(&cfg.name).log();

        let stdout = process.stdout.take().expect("child stdout is piped");
        let stdin = process.stdin.take().expect("child stdin is piped");
        let queue = EventQueue::new(cfg.backlog);

        // Reader task: forward complete command lines to the reactor, and
        // report EOF so the supervisor can respawn or drop the child.
        let reader = {
            let name = cfg.name.clone();
            let api_commandp = api_commandp.clone();
            let api_exitp = api_exitp.clone();
            Task::spawn(
                async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.is_empty() {
                            continue;
                        }
                        let msg = ApiCommandMsg {
                            process: name.clone(),
                            line,
                        };
                        if api_commandp.send(msg).await.is_err() {
                            return;
                        }
                    }
                    let _ = api_exitp
                        .send(ApiExitMsg {
                            process: name.clone(),
                        })
                        .await;
                }
                .in_current_span(),
            )
        };

        // Writer task: drain the event backlog into the child's stdin.
        let writer = {
            let queue = queue.clone();
            Task::spawn(
                async move {
                    api_write_loop(stdin, queue).await;
                }
                .in_current_span(),
            )
        };

        Ok(ApiChild {
            cfg,
            queue,
            ack: true,
            process: Some(process),
            _reader: Some(reader),
            _writer: Some(writer),
        })
    }

    fn deliver(&mut self, event: &ApiEvent) {
        let line = match self.cfg.encoder {
            ApiEncoder::Json => event.to_json(),
            ApiEncoder::Text => event.to_text(),
        };
        if !self.queue.push(line) {
            Debug::ApiBacklogDrop(
                &self.cfg.name,
                self.queue.dropped.load(Ordering::Relaxed),
            )
            .log();
        }
    }
}

impl Drop for ApiChild {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.start_kill();
        }
    }
}

// ===== impl EventQueue =====

impl EventQueue {
    fn new(cap: usize) -> EventQueue {
        EventQueue {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            cap,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    // Appends a line, dropping the oldest entry when the backlog is full.
    // Returns false when something was dropped.
    fn push(&self, line: String) -> bool {
        let mut lines = self.lines.lock().unwrap();
        let mut fit = true;
        while lines.len() >= self.cap {
            lines.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            fit = false;
        }
        lines.push_back(line);
        drop(lines);
        self.notify.notify_one();
        fit
    }

    fn try_pop(&self) -> Option<String> {
        self.lines.lock().unwrap().pop_front()
    }

    // Number of events dropped due to backlog overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ===== impl ApiEvent =====

impl ApiEvent {
    fn to_json(&self) -> String {
        let record = serde_json::json!({
            "time": Utc::now().to_rfc3339(),
            "ferric": self,
        });
        record.to_string()
    }

    fn to_text(&self) -> String {
        let time = Utc::now().to_rfc3339();
        match self {
            ApiEvent::PeerUp {
                peer,
                identifier,
                holdtime,
            } => {
                format!(
                    "{time} neighbor {peer} up identifier {identifier} \
                     hold-time {holdtime}"
                )
            }
            ApiEvent::PeerDown { peer, reason } => match reason {
                Some(reason) => {
                    format!("{time} neighbor {peer} down reason {reason}")
                }
                None => format!("{time} neighbor {peer} down"),
            },
            ApiEvent::PeerStateChange {
                peer,
                old_state,
                new_state,
            } => {
                format!(
                    "{time} neighbor {peer} state {old_state:?} -> \
                     {new_state:?}"
                )
            }
            ApiEvent::UpdateRx {
                peer,
                announced,
                withdrawn,
            } => {
                format!(
                    "{time} neighbor {peer} update announced [{}] \
                     withdrawn [{}]",
                    announced.join(", "),
                    withdrawn.join(", ")
                )
            }
            ApiEvent::UpdateTx {
                peer,
                announced,
                withdrawn,
            } => {
                format!(
                    "{time} neighbor {peer} update sent announced [{}] \
                     withdrawn [{}]",
                    announced.join(", "),
                    withdrawn.join(", ")
                )
            }
            ApiEvent::NotificationRx {
                peer,
                code,
                subcode,
            } => {
                format!(
                    "{time} neighbor {peer} notification received \
                     {code}/{subcode}"
                )
            }
            ApiEvent::NotificationTx {
                peer,
                code,
                subcode,
            } => {
                format!(
                    "{time} neighbor {peer} notification sent {code}/{subcode}"
                )
            }
            ApiEvent::Operational { peer, code } => {
                format!("{time} neighbor {peer} operational {code}")
            }
            ApiEvent::Eor { peer, family } => {
                format!("{time} neighbor {peer} end-of-rib {family}")
            }
            ApiEvent::CommandResult { ok, message } => {
                let status = if *ok { "done" } else { "error" };
                format!("{time} {status} {message}")
            }
            ApiEvent::RibEntry {
                peer,
                direction,
                family,
                nlri,
                nexthop,
            } => match nexthop {
                Some(nexthop) => {
                    format!(
                        "{time} neighbor {peer} rib-{direction} {family} \
                         {nlri} next-hop {nexthop}"
                    )
                }
                None => {
                    format!(
                        "{time} neighbor {peer} rib-{direction} {family} \
                         {nlri} withdrawn"
                    )
                }
            },
            ApiEvent::Shutdown => format!("{time} shutdown"),
        }
    }
}

// ===== helper functions =====

async fn api_write_loop(mut stdin: ChildStdin, queue: EventQueue) {
    loop {
        match queue.try_pop() {
            Some(mut line) => {
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    // The child stopped reading; the reader task handles
                    // the exit.
                    return;
                }
            }
            None => queue.notified().await,
        }
    }
}

impl EventQueue {
    async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_drops_oldest() {
        let queue = EventQueue::new(3);

        assert!(queue.push("a".to_string()));
        assert!(queue.push("b".to_string()));
        assert!(queue.push("c".to_string()));
        // Overflow drops the oldest entry.
        assert!(!queue.push("d".to_string()));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.try_pop().as_deref(), Some("b"));
        assert_eq!(queue.try_pop().as_deref(), Some("c"));
        assert_eq!(queue.try_pop().as_deref(), Some("d"));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn text_encoding_is_single_line() {
        let event = ApiEvent::UpdateRx {
            peer: "10.0.0.2".parse().unwrap(),
            announced: vec!["10.100.0.0/16".to_string()],
            withdrawn: vec![],
        };
        assert!(!event.to_text().contains('\n'));
        assert!(!event.to_json().contains('\n'));
    }
}
