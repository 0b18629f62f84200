use std::sync::Arc;

use chat_relay::{
    mailbox::{Mailbox, MailboxReader},
    message::{BODY_MAX, SENDER_MAX},
};
use tempfile::tempdir;

#[test]
fn publish_then_poll_roundtrips() {
    let dir = tempdir().expect("tempdir");
    let mailbox = Arc::new(Mailbox::open(&dir.path().join("slot.shm")).expect("open mailbox"));
    let mut reader = MailboxReader::attach(Arc::clone(&mailbox));

    assert_eq!(reader.poll(), None, "fresh mailbox has nothing to deliver");

    mailbox.publish("alice", "hello mailbox");
    let message = reader.poll().expect("message after publish");
    assert_eq!(message.sender, "alice");
    assert_eq!(message.body, "hello mailbox");

    assert_eq!(reader.poll(), None, "a message is delivered only once");
}

#[test]
fn oversized_fields_are_truncated_not_overflowed() {
    let dir = tempdir().expect("tempdir");
    let mailbox = Arc::new(Mailbox::open(&dir.path().join("slot.shm")).expect("open mailbox"));
    let mut reader = MailboxReader::attach(Arc::clone(&mailbox));

    let long_sender = "s".repeat(SENDER_MAX + 40);
    let long_body = "b".repeat(BODY_MAX + 100);
    mailbox.publish(&long_sender, &long_body);

    let message = reader.poll().expect("truncated message");
    assert_eq!(message.sender, "s".repeat(SENDER_MAX));
    assert_eq!(message.body, "b".repeat(BODY_MAX));
}

#[test]
fn rapid_publishes_deliver_only_the_latest() {
    let dir = tempdir().expect("tempdir");
    let mailbox = Arc::new(Mailbox::open(&dir.path().join("slot.shm")).expect("open mailbox"));
    let mut reader = MailboxReader::attach(Arc::clone(&mailbox));

    // Two publishes land before the reader polls once. The slot is not a
    // queue: the first message is silently lost, by design.
    mailbox.publish("alice", "first");
    mailbox.publish("bob", "second");

    let message = reader.poll().expect("latest message");
    assert_eq!(message.sender, "bob");
    assert_eq!(message.body, "second");

    assert_eq!(reader.poll(), None, "the overwritten message never surfaces");
}

#[test]
fn late_attaching_reader_does_not_replay_history() {
    let dir = tempdir().expect("tempdir");
    let mailbox = Arc::new(Mailbox::open(&dir.path().join("slot.shm")).expect("open mailbox"));

    for i in 0..5 {
        mailbox.publish("alice", &format!("message {i}"));
    }
    assert_eq!(mailbox.version(), 5);

    let mut late = MailboxReader::attach(Arc::clone(&mailbox));
    assert_eq!(late.poll(), None, "history must not replay as new");

    mailbox.publish("alice", "message 5");
    let message = late.poll().expect("only the post-attach publish");
    assert_eq!(message.body, "message 5");
}

#[test]
fn separate_mappings_of_one_segment_share_the_slot() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("slot.shm");

    // Two independent mappings stand in for two processes.
    let writer_side = Mailbox::open(&path).expect("open writer mapping");
    let reader_side = Arc::new(Mailbox::open(&path).expect("open reader mapping"));
    let mut reader = MailboxReader::attach(Arc::clone(&reader_side));

    writer_side.publish("alice", "across mappings");
    let message = reader.poll().expect("message across mappings");
    assert_eq!(message.sender, "alice");
    assert_eq!(message.body, "across mappings");
}

#[test]
fn version_only_increases_across_publishes() {
    let dir = tempdir().expect("tempdir");
    let mailbox = Mailbox::open(&dir.path().join("slot.shm")).expect("open mailbox");

    let mut last = mailbox.version();
    assert_eq!(last, 0);
    for _ in 0..10 {
        mailbox.publish("alice", "tick");
        let now = mailbox.version();
        assert!(now > last);
        last = now;
    }
}
