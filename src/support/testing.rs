//! Scripted transport and fixtures shared by the component tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::TransportFailure;
use crate::session::{Role, Session};

use super::client::{ApiRequest, Method, Transport};

pub type Responder = Box<dyn FnMut(&ApiRequest) -> Result<Value, TransportFailure> + Send>;

struct Gate {
  entered: Notify,
  release: Notify,
}

/// Transport answering from a closure and recording every call.
pub struct ScriptedTransport {
  responder: Mutex<Responder>,
  calls: Mutex<Vec<ApiRequest>>,
  gate: Option<Gate>,
}

impl ScriptedTransport {
  pub fn new(responder: impl FnMut(&ApiRequest) -> Result<Value, TransportFailure> + Send + 'static) -> Arc<Self> {
    Arc::new(Self {
      responder: Mutex::new(Box::new(responder)),
      calls: Mutex::new(Vec::new()),
      gate: None,
    })
  }

  /// Every call blocks after being recorded until [`Self::release`].
  pub fn gated(responder: impl FnMut(&ApiRequest) -> Result<Value, TransportFailure> + Send + 'static) -> Arc<Self> {
    Arc::new(Self {
      responder: Mutex::new(Box::new(responder)),
      calls: Mutex::new(Vec::new()),
      gate: Some(Gate {
        entered: Notify::new(),
        release: Notify::new(),
      }),
    })
  }

  pub fn offline() -> Arc<Self> {
    Self::new(|_| Err(TransportFailure::no_response("connection refused")))
  }

  pub fn server_error() -> Arc<Self> {
    Self::new(|_| {
      Err(TransportFailure::Server {
        status: 500,
        body: "internal error".to_string(),
      })
    })
  }

  /// Accept every write, answering with fresh server ids from `first_id`.
  /// Reads fail as unreachable.
  pub fn accepting(first_id: u64) -> Arc<Self> {
    Self::new(accept_writes(first_id))
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn posts(&self) -> Vec<ApiRequest> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.method == Method::Post)
      .collect()
  }

  /// Swap the responder, e.g. when the server comes back.
  pub fn respond_with(&self, responder: impl FnMut(&ApiRequest) -> Result<Value, TransportFailure> + Send + 'static) {
    *self.responder.lock().unwrap() = Box::new(responder);
  }

  pub async fn wait_entered(&self) {
    if let Some(gate) = &self.gate {
      gate.entered.notified().await;
    }
  }

  pub fn release(&self) {
    if let Some(gate) = &self.gate {
      gate.release.notify_one();
    }
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn call(&self, request: &ApiRequest, _credential: &str) -> Result<Value, TransportFailure> {
    self.calls.lock().unwrap().push(request.clone());
    if let Some(gate) = &self.gate {
      gate.entered.notify_one();
      gate.release.notified().await;
    }
    let mut guard = self.responder.lock().unwrap();
    let responder = &mut *guard;
    responder(request)
  }
}

/// Responder that confirms ticket creations and message sends.
pub fn accept_writes(first_id: u64) -> impl FnMut(&ApiRequest) -> Result<Value, TransportFailure> + Send {
  let mut next = first_id;
  move |request: &ApiRequest| match (request.method, request.path.as_str()) {
    (Method::Post, "tickets/") => {
      let body = request.body.clone().unwrap_or_default();
      let id = next;
      next += 1;
      let mut ticket = ticket_json(id, body["employee"].as_u64().unwrap_or(0), body["title"].as_str().unwrap_or(""));
      ticket["description"] = body["description"].clone();
      Ok(ticket)
    }
    (Method::Post, "messages/") => {
      let body = request.body.clone().unwrap_or_default();
      let id = next;
      next += 1;
      Ok(json!({
        "id": id,
        "ticket": body["ticket"],
        "sender": body["sender"],
        "content": body["content"],
        "created_at": Utc::now(),
        "is_from_admin": false,
        "is_read": false,
      }))
    }
    _ => Err(TransportFailure::no_response("connection refused")),
  }
}

pub fn ticket_json(id: u64, owner: u64, title: &str) -> Value {
  json!({
    "id": id,
    "employee": owner,
    "employee_name": "Test Employee",
    "title": title,
    "description": "",
    "status": "open",
    "priority": "medium",
    "created_at": Utc::now(),
    "updated_at": Utc::now(),
    "category": null,
    "assigned_to": null,
  })
}

pub fn message_json(id: u64, ticket: u64, sender: u64, content: &str) -> Value {
  json!({
    "id": id,
    "ticket": ticket,
    "sender": sender,
    "sender_name": "Test Employee",
    "content": content,
    "created_at": Utc::now(),
    "is_read": false,
    "is_from_admin": false,
  })
}

/// A regular employee (user 10, employee 3).
pub fn standard_session() -> Session {
  Session::new(10, Some(3), Role::Standard, "employee-token")
}

/// Another regular employee (user 11, employee 4).
pub fn other_session() -> Session {
  Session::new(11, Some(4), Role::Standard, "other-token")
}

pub fn admin_session() -> Session {
  Session::new(1, None, Role::Admin, "admin-token")
}
