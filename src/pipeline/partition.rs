//! Random partitioning of job inputs into fixed-size tasks.

use std::collections::HashSet;

use mediabatch_common::paths::with_suffix;
use mediabatch_common::{Error, Result};
use rand::Rng;

/// One input placed in a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAssignment<T> {
    /// 0-based task index.
    pub task: usize,
    /// Entry name inside the task folder, unique within the task.
    pub entry_name: String,
    pub item: T,
}

impl<T> TaskAssignment<T> {
    /// Full archive path of this entry: `task<N>/<name>` with `N` 1-based.
    pub fn archive_path(&self) -> String {
        format!("task{}/{}", self.task + 1, self.entry_name)
    }
}

/// Unbiased in-place Fisher–Yates shuffle.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in 1..items.len() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Shuffle `items` and slice them into consecutive tasks of `batch_size`.
///
/// Every task but possibly the last has exactly `batch_size` members. Entry
/// names come from `entry_name`; repeats inside one task get a numeric
/// suffix (`a.png`, `a-2.png`).
pub fn partition<T, R, F>(
    mut items: Vec<T>,
    batch_size: usize,
    rng: &mut R,
    entry_name: F,
) -> Result<Vec<TaskAssignment<T>>>
where
    R: Rng + ?Sized,
    F: Fn(&T) -> String,
{
    if batch_size == 0 {
        return Err(Error::validation("batch size must be at least 1"));
    }

    shuffle(&mut items, rng);

    let mut assignments = Vec::with_capacity(items.len());
    let mut taken: HashSet<String> = HashSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let task = index / batch_size;
        if index % batch_size == 0 {
            taken.clear();
        }

        let base = entry_name(&item);
        let mut name = base.clone();
        let mut n = 2;
        while !taken.insert(name.clone()) {
            name = with_suffix(&base, n);
            n += 1;
        }

        assignments.push(TaskAssignment {
            task,
            entry_name: name,
            item,
        });
    }

    Ok(assignments)
}

/// Number of tasks `n` items produce at `batch_size`.
pub fn task_count(n: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        n.div_ceil(batch_size)
    }
}
