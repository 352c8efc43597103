// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-recipient outbound queue with purge and hang detection.
//!
//! Delivery into a mailbox is best-effort: when the box is still full the
//! message waits in a local FIFO and the head is retried each poll. The
//! `blocked_since` stamp marks when the queue first backed up; a queue
//! blocked past the supervisor's hang timeout is evidence the app stopped
//! reading its mail.

use std::collections::VecDeque;

use crate::segment::{Channel, ChannelError, Mailbox};

/// Ordered local queue in front of one agent→app mailbox.
#[derive(Debug, Default)]
pub struct MsgQueue {
    queue: VecDeque<String>,
    blocked_since_ms: Option<u64>,
}

impl MsgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt immediate delivery; queue on mailbox-full.
    ///
    /// Direct delivery is only allowed when nothing is already queued,
    /// otherwise ordering would invert.
    pub fn send(
        &mut self,
        chan: &Channel,
        mbox: Mailbox,
        msg: String,
        now_ms: u64,
    ) -> Result<(), ChannelError> {
        if self.queue.is_empty() && chan.send(mbox, &msg)? {
            return Ok(());
        }
        self.queue.push_back(msg);
        if self.blocked_since_ms.is_none() {
            self.blocked_since_ms = Some(now_ms);
        }
        Ok(())
    }

    /// Retry the queue head. Returns `true` if a message was delivered.
    pub fn poll(&mut self, chan: &Channel, mbox: Mailbox) -> Result<bool, ChannelError> {
        let Some(head) = self.queue.front() else {
            return Ok(false);
        };
        if chan.send(mbox, head)? {
            self.queue.pop_front();
            if self.queue.is_empty() {
                self.blocked_since_ms = None;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove the most recently queued message if it textually equals
    /// `msg`. Cancels a redundant opposite-direction command (a queued
    /// `<suspend/>` when a `<resume/>` arrives before it was ever sent).
    pub fn purge(&mut self, msg: &str) -> bool {
        if self.queue.back().map(String::as_str) == Some(msg) {
            self.queue.pop_back();
            if self.queue.is_empty() {
                self.blocked_since_ms = None;
            }
            return true;
        }
        false
    }

    /// How long the queue has been blocked, if it is.
    pub fn blocked_for_ms(&self, now_ms: u64) -> Option<u64> {
        self.blocked_since_ms.map(|t| now_ms.saturating_sub(t))
    }

    pub fn blocked_since_ms(&self) -> Option<u64> {
        self.blocked_since_ms
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drop everything (channel going away).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.blocked_since_ms = None;
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
