//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{debug, debug_span};

use crate::neighbor::fsm;
use crate::packet::consts::AttrType;
use crate::packet::error::AttrError;
use crate::packet::message::Message;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceShutdown,
    ListenerStart(&'a IpAddr),
    NbrFsmEvent(&'a IpAddr, &'a fsm::Event),
    NbrFsmTransition(&'a IpAddr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a IpAddr, &'a Message),
    NbrMsgTx(&'a IpAddr, &'a Message),
    NbrAttrError(AttrType, AttrError),
    ApiProcessSpawn(&'a str),
    ApiProcessExit(&'a str),
    ApiBacklogDrop(&'a str, u64),
    ApiCommandRx(&'a str, &'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceShutdown => {
                debug!("{}", self);
            }
            Debug::ListenerStart(addr) => {
                debug!(%addr, "{}", self);
            }
            Debug::NbrFsmEvent(addr, event) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    })
                });
            }
            Debug::NbrFsmTransition(addr, old_state, new_state) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::NbrMsgRx(addr, msg) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrMsgTx(addr, msg) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrAttrError(attr_type, action) => {
                debug!(?attr_type, ?action, "{}", self);
            }
            Debug::ApiProcessSpawn(name) | Debug::ApiProcessExit(name) => {
                debug_span!("api", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::ApiBacklogDrop(name, dropped) => {
                debug_span!("api", %name).in_scope(|| {
                    debug!(%dropped, "{}", self);
                });
            }
            Debug::ApiCommandRx(name, line) => {
                debug_span!("api", %name).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(%line, "{}", self);
                    })
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceShutdown => {
                write!(f, "shutting down")
            }
            Debug::ListenerStart(..) => {
                write!(f, "listener started")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) | Debug::NbrMsgTx(..) => {
                write!(f, "message")
            }
            Debug::NbrAttrError(..) => {
                write!(f, "malformed attribute")
            }
            Debug::ApiProcessSpawn(..) => {
                write!(f, "process spawned")
            }
            Debug::ApiProcessExit(..) => {
                write!(f, "process exited")
            }
            Debug::ApiBacklogDrop(..) => {
                write!(f, "event backlog overflow, oldest dropped")
            }
            Debug::ApiCommandRx(..) => {
                write!(f, "command")
            }
        }
    }
}
