mod common;

use std::sync::Arc;

use common::WAIT;
use parking_lot::Mutex;
use textpipe::mailbox::{self, Actor, Flow};

#[derive(Debug)]
enum Command {
    Push(u32),
    Stop,
}

/// Records every handled value and whether `stopped` ran
struct Recorder {
    seen: Arc<Mutex<Vec<u32>>>,
    stopped: Arc<Mutex<bool>>,
}

impl Actor for Recorder {
    type Message = Command;

    fn handle(&mut self, message: Command) -> Flow {
        match message {
            Command::Push(value) => {
                self.seen.lock().push(value);
                Flow::Continue
            }
            Command::Stop => Flow::Stop,
        }
    }

    fn stopped(&mut self) {
        *self.stopped.lock() = true;
    }
}

fn recorder() -> (Recorder, Arc<Mutex<Vec<u32>>>, Arc<Mutex<bool>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stopped = Arc::new(Mutex::new(false));
    let actor = Recorder {
        seen: Arc::clone(&seen),
        stopped: Arc::clone(&stopped),
    };
    (actor, seen, stopped)
}

#[tokio::test]
async fn test_messages_are_handled_in_order() {
    let (actor, seen, _) = recorder();
    let mailbox = mailbox::spawn("test", actor);

    for value in 0..10 {
        assert!(mailbox.post(Command::Push(value)));
    }
    mailbox.post(Command::Stop);
    tokio::time::timeout(WAIT, mailbox.closed()).await.unwrap();

    assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_post_after_stop_is_rejected_quietly() {
    let (actor, seen, stopped) = recorder();
    let mailbox = mailbox::spawn("test", actor);

    mailbox.post(Command::Push(1));
    mailbox.post(Command::Stop);
    mailbox.post(Command::Push(2));
    tokio::time::timeout(WAIT, mailbox.closed()).await.unwrap();

    assert!(mailbox.is_closed());
    assert!(!mailbox.post(Command::Push(3)));
    assert_eq!(*seen.lock(), vec![1]);
    assert!(*stopped.lock());
}

#[tokio::test]
async fn test_loop_ends_when_all_handles_are_dropped() {
    let (actor, seen, stopped) = recorder();
    let mailbox = mailbox::spawn("test", actor);
    let weak = mailbox.downgrade();
    let clone = mailbox.clone();

    mailbox.post(Command::Push(7));
    drop(mailbox);
    assert!(weak.upgrade().is_some());
    drop(clone);

    tokio::time::timeout(WAIT, async {
        while !*stopped.lock() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*seen.lock(), vec![7]);
    assert!(weak.upgrade().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_posting_from_many_threads() {
    let (actor, seen, _) = recorder();
    let mailbox = mailbox::spawn("test", actor);

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || {
                for i in 0..250 {
                    mailbox.post(Command::Push(t * 1000 + i));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    mailbox.post(Command::Stop);
    tokio::time::timeout(WAIT, mailbox.closed()).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1000);
    for t in 0..4 {
        let mine: Vec<u32> = seen.iter().copied().filter(|v| v / 1000 == t).collect();
        assert_eq!(mine, (0..250).map(|i| t * 1000 + i).collect::<Vec<_>>());
    }
}
