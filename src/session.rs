//! In-memory state of a control surface session.
//!
//! Accounts, message templates, the keyword and the visible log live here
//! for as long as the session does; nothing is persisted.

use std::collections::VecDeque;

use chrono::Local;
use serde::Serialize;

use crate::error::{PanelError, Result};
use crate::logs::{LogEvent, LogKind};
use crate::worker::RunRequest;

const DEFAULT_MESSAGE: &str = "안녕하세요! 서로이웃 신청드립니다.";
/// Number of log entries a control surface keeps on display.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: u64,
    pub naver_id: String,
    pub naver_pw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub id: u64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
}

/// Bounded list of the most recent log entries.
#[derive(Debug, Clone)]
pub struct LogBook {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogBook {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBook {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Stamp an event with the local wall-clock time and append it.
    pub fn push(&mut self, event: LogEvent) -> &LogEntry {
        self.entries.push_back(LogEntry {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            kind: event.kind,
            message: event.message,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        &self.entries[self.entries.len() - 1]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Remove `id` from a list that must never become empty, moving the
/// selection to the first remaining item if it pointed at `id`.
fn remove_keeping_one<T>(
    items: &mut Vec<T>,
    id: u64,
    selected: &mut u64,
    id_of: impl Fn(&T) -> u64,
) -> bool {
    if items.len() <= 1 {
        return false;
    }
    let Some(pos) = items.iter().position(|item| id_of(item) == id) else {
        return false;
    };
    items.remove(pos);
    if *selected == id {
        *selected = id_of(&items[0]);
    }
    true
}

#[derive(Debug, Clone)]
pub struct Session {
    accounts: Vec<Account>,
    selected_account: u64,
    messages: Vec<MessageTemplate>,
    selected_message: u64,
    pub keyword: String,
    pub logs: LogBook,
    next_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session: one blank account and one default message, both
    /// selected.
    pub fn new() -> Self {
        Self {
            accounts: vec![Account {
                id: 1,
                naver_id: String::new(),
                naver_pw: String::new(),
            }],
            selected_account: 1,
            messages: vec![MessageTemplate {
                id: 1,
                content: DEFAULT_MESSAGE.to_string(),
            }],
            selected_message: 1,
            keyword: String::new(),
            logs: LogBook::default(),
            next_id: 2,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn selected_account(&self) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.id == self.selected_account)
    }

    /// Add a blank account and select it.
    pub fn add_account(&mut self) -> u64 {
        let id = self.allocate_id();
        self.accounts.push(Account {
            id,
            naver_id: String::new(),
            naver_pw: String::new(),
        });
        self.selected_account = id;
        id
    }

    /// Remove an account. The last remaining account cannot be removed.
    pub fn remove_account(&mut self, id: u64) -> bool {
        remove_keeping_one(&mut self.accounts, id, &mut self.selected_account, |a| {
            a.id
        })
    }

    pub fn update_account(
        &mut self,
        id: u64,
        naver_id: impl Into<String>,
        naver_pw: impl Into<String>,
    ) -> bool {
        match self.accounts.iter_mut().find(|account| account.id == id) {
            Some(account) => {
                account.naver_id = naver_id.into();
                account.naver_pw = naver_pw.into();
                true
            }
            None => false,
        }
    }

    pub fn select_account(&mut self, id: u64) -> bool {
        let known = self.accounts.iter().any(|account| account.id == id);
        if known {
            self.selected_account = id;
        }
        known
    }

    pub fn messages(&self) -> &[MessageTemplate] {
        &self.messages
    }

    pub fn selected_message(&self) -> Option<&MessageTemplate> {
        self.messages
            .iter()
            .find(|message| message.id == self.selected_message)
    }

    /// Add an empty message template and select it.
    pub fn add_message(&mut self) -> u64 {
        let id = self.allocate_id();
        self.messages.push(MessageTemplate {
            id,
            content: String::new(),
        });
        self.selected_message = id;
        id
    }

    pub fn remove_message(&mut self, id: u64) -> bool {
        remove_keeping_one(&mut self.messages, id, &mut self.selected_message, |m| {
            m.id
        })
    }

    pub fn update_message(&mut self, id: u64, content: impl Into<String>) -> bool {
        match self.messages.iter_mut().find(|message| message.id == id) {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn select_message(&mut self, id: u64) -> bool {
        let known = self.messages.iter().any(|message| message.id == id);
        if known {
            self.selected_message = id;
        }
        known
    }

    /// Validate the current selection and build the launch payload.
    pub fn run_request(&self) -> Result<RunRequest> {
        let account = self
            .selected_account()
            .filter(|a| !a.naver_id.is_empty() && !a.naver_pw.is_empty())
            .ok_or_else(|| {
                PanelError::Validation("Naver ID and password are required".to_string())
            })?;
        if self.keyword.trim().is_empty() {
            return Err(PanelError::Validation(
                "a search keyword is required".to_string(),
            ));
        }
        let message = self
            .selected_message()
            .filter(|m| !m.content.is_empty())
            .ok_or_else(|| {
                PanelError::Validation("a neighbor request message is required".to_string())
            })?;

        Ok(RunRequest {
            naver_id: account.naver_id.clone(),
            naver_pw: account.naver_pw.clone(),
            keyword: self.keyword.clone(),
            message: message.content.clone(),
        })
    }

    /// Prepare a run the way the control surface does before calling the
    /// launcher: on invalid input an error entry is logged and nothing is
    /// returned; otherwise the log is reset and the run summary is logged.
    pub fn begin_run(&mut self) -> Option<RunRequest> {
        match self.run_request() {
            Ok(request) => {
                self.logs.clear();
                self.logs
                    .push(LogEvent::info("Starting automatic neighbor requests..."));
                self.logs
                    .push(LogEvent::info(format!("Account: {}", request.naver_id)));
                self.logs
                    .push(LogEvent::info(format!("Keyword: {}", request.keyword)));
                self.logs
                    .push(LogEvent::info(format!("Message: {}", request.message)));
                Some(request)
            }
            Err(e) => {
                self.logs.push(LogEvent::error(e.to_string()));
                None
            }
        }
    }
}
