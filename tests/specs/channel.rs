// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario D: mailbox-full queueing and the blocked timestamp.

use quern_channel::{Channel, Mailbox, MsgQueue};

fn temp_channel() -> (tempfile::TempDir, Channel) {
    let dir = tempfile::tempdir().unwrap();
    let chan = Channel::create(dir.path().join("channel")).unwrap();
    (dir, chan)
}

#[test]
fn queued_message_survives_three_failed_polls_with_one_stamp() {
    let (_dir, chan) = temp_channel();
    let mut queue = MsgQueue::new();

    // Mailbox already holds an unread message
    chan.send(Mailbox::ProcessControl, "<earlier/>").unwrap();

    // Second message queues and stamps the first-blocked time
    queue.send(&chan, Mailbox::ProcessControl, "<quit/>".into(), 10_000).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.blocked_since_ms(), Some(10_000));

    // Receiver never reads: three polls fail, stamp never moves
    for _ in 0..3 {
        assert!(!queue.poll(&chan, Mailbox::ProcessControl).unwrap());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.blocked_since_ms(), Some(10_000));
    }

    // 180s later this queue reads as hung
    assert_eq!(queue.blocked_for_ms(190_000), Some(180_000));

    // Once the receiver drains the box, the queue flushes and unblocks
    assert_eq!(chan.receive(Mailbox::ProcessControl).unwrap().as_deref(), Some("<earlier/>"));
    assert!(queue.poll(&chan, Mailbox::ProcessControl).unwrap());
    assert!(queue.is_empty());
    assert_eq!(queue.blocked_since_ms(), None);
    assert_eq!(chan.receive(Mailbox::ProcessControl).unwrap().as_deref(), Some("<quit/>"));
}

#[test]
fn opposite_command_purge_cancels_undelivered_pair() {
    let (_dir, chan) = temp_channel();
    let mut queue = MsgQueue::new();
    chan.send(Mailbox::ProcessControl, "<stuck/>").unwrap();

    queue.send(&chan, Mailbox::ProcessControl, "<suspend/>".into(), 1_000).unwrap();
    assert!(queue.purge("<suspend/>"));
    assert!(queue.is_empty());

    // Neither suspend nor resume ever reaches the wire
    assert_eq!(chan.receive(Mailbox::ProcessControl).unwrap().as_deref(), Some("<stuck/>"));
    assert!(!queue.poll(&chan, Mailbox::ProcessControl).unwrap());
    assert_eq!(chan.receive(Mailbox::ProcessControl).unwrap(), None);
}
