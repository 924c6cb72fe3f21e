// Copyright 2018-2025 the Deno authors. MIT license.

//! A per-package queue that executes rebuild tasks sequentially one after
//! the other, retrying a failed task a bounded number of times before
//! giving up on the whole drain.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::errors::AnyError;

const RETRY_LIMIT: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub type TaskFn =
  Arc<dyn Fn() -> BoxFuture<'static, Result<(), AnyError>> + Send + Sync>;

struct QueuedTask {
  name: &'static str,
  run: TaskFn,
}

#[derive(Default)]
struct QueueState {
  tasks: VecDeque<QueuedTask>,
  processing: bool,
  retry_count: u32,
}

/// Invariant: at most one task executes at a time per queue; queues of
/// different packages drain independently.
#[derive(Default)]
pub struct TaskQueue {
  state: Mutex<QueueState>,
}

impl TaskQueue {
  /// Drops all pending tasks. A task currently executing is unaffected;
  /// the running drain picks up whatever is enqueued afterwards.
  pub fn clear(&self) {
    self.state.lock().tasks.clear();
  }

  pub fn push(&self, name: &'static str, run: TaskFn) {
    self.state.lock().tasks.push_back(QueuedTask { name, run });
  }

  pub fn len(&self) -> usize {
    self.state.lock().tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state.lock().tasks.is_empty()
  }

  /// Executes queued tasks in FIFO order until the queue is empty. Returns
  /// immediately when another drain is already running; that drain will
  /// pick up any newly queued work.
  ///
  /// A failing task is re-inserted at the head and retried after a fixed
  /// backoff while the retry budget lasts; once the budget is exhausted
  /// the failure is returned and the remaining tasks are left queued for
  /// the caller to inspect or clear.
  pub async fn drain(&self) -> Result<(), AnyError> {
    {
      let mut state = self.state.lock();
      if state.processing {
        return Ok(());
      }
      state.processing = true;
    }

    loop {
      let Some(task) = ({
        let mut state = self.state.lock();
        let task = state.tasks.pop_front();
        if task.is_none() {
          state.processing = false;
          state.retry_count = 0;
        }
        task
      }) else {
        return Ok(());
      };

      match (task.run)().await {
        Ok(()) => {
          self.state.lock().retry_count = 0;
        }
        Err(err) => {
          let retry_count = {
            let mut state = self.state.lock();
            state.retry_count += 1;
            state.retry_count
          };
          log::warn!(
            "task \"{}\" failed (attempt {}): {err:#}",
            task.name,
            retry_count,
          );
          tokio::time::sleep(RETRY_BACKOFF).await;
          if retry_count <= RETRY_LIMIT {
            self.state.lock().tasks.push_front(task);
          } else {
            let mut state = self.state.lock();
            state.processing = false;
            state.retry_count = 0;
            drop(state);
            return Err(err).with_context(|| {
              format!("task \"{}\" gave up after {} attempts", task.name, retry_count)
            });
          }
        }
      }
    }
  }
}
