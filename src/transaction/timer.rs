use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
    time::{Duration, Instant},
};

#[derive(Debug, PartialEq, Eq, Clone)]
struct TimerKey {
    execute_at: Instant,
    task_id: u64,
}

impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.execute_at
            .cmp(&other.execute_at)
            .then(self.task_id.cmp(&other.task_id))
    }
}

impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered task table polled by the transaction manager.
pub struct Timer<T> {
    tasks: RwLock<BTreeMap<TimerKey, T>>,
    id_to_tasks: RwLock<HashMap<u64, Instant>>,
    last_task_id: AtomicU64,
}

impl<T> Default for Timer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Timer<T> {
    pub fn new() -> Self {
        Timer {
            tasks: RwLock::new(BTreeMap::new()),
            id_to_tasks: RwLock::new(HashMap::new()),
            last_task_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|ts| ts.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timeout(&self, duration: Duration, value: T) -> u64 {
        self.timeout_at(Instant::now() + duration, value)
    }

    pub fn timeout_at(&self, execute_at: Instant, value: T) -> u64 {
        let task_id = self.last_task_id.fetch_add(1, Ordering::Relaxed);
        self.tasks
            .write()
            .as_mut()
            .map(|ts| {
                ts.insert(
                    TimerKey {
                        execute_at,
                        task_id,
                    },
                    value,
                )
            })
            .ok();

        self.id_to_tasks
            .write()
            .as_mut()
            .map(|it| it.insert(task_id, execute_at))
            .ok();
        task_id
    }

    pub fn cancel(&self, task_id: u64) -> Option<T> {
        let position = self
            .id_to_tasks
            .write()
            .as_mut()
            .map(|it| it.remove(&task_id))
            .ok()
            .flatten();

        let execute_at = position?;
        self.tasks
            .write()
            .as_mut()
            .map(|ts| {
                ts.remove(&TimerKey {
                    execute_at,
                    task_id,
                })
            })
            .ok()
            .flatten()
    }

    /// Drop every pending task. A task already returned by `poll` is unaffected.
    pub fn clear(&self) -> usize {
        let cleared = self
            .tasks
            .write()
            .as_mut()
            .map(|ts| {
                let n = ts.len();
                ts.clear();
                n
            })
            .unwrap_or_default();
        self.id_to_tasks
            .write()
            .as_mut()
            .map(|it| it.clear())
            .ok();
        cleared
    }

    pub fn poll(&self, now: Instant) -> Vec<T> {
        let mut result = Vec::new();
        let keys_to_remove = {
            let mut tasks = match self.tasks.write() {
                Ok(tasks) => tasks,
                Err(_) => return result,
            };

            let keys_to_remove = tasks
                .range(
                    ..=TimerKey {
                        execute_at: now,
                        task_id: u64::MAX,
                    },
                )
                .map(|(key, _)| key.clone())
                .collect::<Vec<_>>();

            if keys_to_remove.is_empty() {
                return result;
            }
            result.reserve(keys_to_remove.len());
            for key in keys_to_remove.iter() {
                if let Some(value) = tasks.remove(key) {
                    result.push(value);
                }
            }
            keys_to_remove
        };
        self.id_to_tasks
            .write()
            .as_mut()
            .map(|it| {
                for key in keys_to_remove {
                    it.remove(&key.task_id);
                }
            })
            .ok();
        result
    }
}

#[test]
fn test_timer() {
    let timer = Timer::new();
    let now = Instant::now();
    let task_id = timer.timeout_at(now, "register timeout");
    assert_eq!(task_id, 1);
    assert_eq!(timer.cancel(task_id), Some("register timeout"));
    assert_eq!(timer.cancel(task_id), None);

    timer.timeout_at(now, "retransmit invite");
    let fired = timer.poll(now + Duration::from_secs(1));
    assert_eq!(fired, vec!["retransmit invite"]);

    timer.timeout_at(now + Duration::from_millis(1001), "late");
    assert!(timer.poll(now + Duration::from_secs(1)).is_empty());
    assert_eq!(timer.len(), 1);
}

#[test]
fn test_timer_same_deadline() {
    let timer = Timer::new();
    let now = Instant::now();
    timer.timeout_at(now, "timer a");
    timer.timeout_at(now, "timer b");
    assert_eq!(timer.len(), 2);
    assert_eq!(timer.poll(now), vec!["timer a", "timer b"]);
    assert!(timer.is_empty());
}

#[test]
fn test_timer_clear() {
    let timer = Timer::new();
    let id = timer.timeout(Duration::from_secs(10), 1u32);
    timer.timeout(Duration::from_secs(20), 2u32);
    assert_eq!(timer.clear(), 2);
    assert_eq!(timer.cancel(id), None);
    assert_eq!(timer.clear(), 0);
}
