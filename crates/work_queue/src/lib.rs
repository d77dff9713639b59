use std::collections::{BTreeMap, HashMap};

use view::{Generation, ViewRequest};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkItem {
    pub tile_index: usize,
    pub request: ViewRequest,
}

impl WorkItem {
    pub fn generation(&self) -> Generation {
        self.request.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// Drop the pending item for the same tile and append the new one at the tail.
    ///
    /// A tile re-requested every frame keeps moving to the back of the queue.
    #[default]
    ReplaceAndAppend,
    KeepAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkQueueConfig {
    pub dedup: DedupPolicy,
}

#[derive(Debug, Clone)]
pub struct WorkQueue {
    config: WorkQueueConfig,
    pending: BTreeMap<i64, WorkItem>,
    // Sequence of the newest pending item per tile.
    newest_by_tile: HashMap<usize, i64>,
    next_back: i64,
    next_front: i64,
}

impl WorkQueue {
    pub fn new(config: WorkQueueConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
            newest_by_tile: HashMap::new(),
            next_back: 0,
            next_front: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains_tile(&self, tile_index: usize) -> bool {
        self.newest_by_tile.contains_key(&tile_index)
    }

    pub fn schedule(&mut self, request: ViewRequest, order: &[usize]) {
        for &tile_index in order {
            self.push_back(WorkItem {
                tile_index,
                request,
            });
        }
    }

    pub fn push_back(&mut self, item: WorkItem) {
        if self.config.dedup == DedupPolicy::ReplaceAndAppend
            && let Some(previous) = self.newest_by_tile.remove(&item.tile_index)
            && let Some(replaced) = self.pending.remove(&previous)
        {
            tracing::trace!(
                target: "work_queue",
                tile_index = item.tile_index,
                replaced = replaced.generation().0,
                generation = item.generation().0,
                "pending_item_replaced"
            );
        }
        let sequence = self.next_back;
        self.next_back += 1;
        self.pending.insert(sequence, item);
        self.newest_by_tile.insert(item.tile_index, sequence);
    }

    pub fn pop_front(&mut self) -> Option<WorkItem> {
        let (sequence, item) = self.pending.pop_first()?;
        if self.newest_by_tile.get(&item.tile_index) == Some(&sequence) {
            self.newest_by_tile.remove(&item.tile_index);
        }
        Some(item)
    }

    pub fn dequeue_up_to(&mut self, max_items: usize) -> Vec<WorkItem> {
        let mut items = Vec::with_capacity(max_items.min(self.pending.len()));
        while items.len() < max_items {
            let Some(item) = self.pop_front() else {
                break;
            };
            items.push(item);
        }
        items
    }

    /// Put an item that could not be dispatched back at the head of the queue.
    ///
    /// Returns `false` when the item was dropped because a newer item for the
    /// same tile is already pending under `ReplaceAndAppend`.
    pub fn requeue_front(&mut self, item: WorkItem) -> bool {
        if self.config.dedup == DedupPolicy::ReplaceAndAppend
            && self.newest_by_tile.contains_key(&item.tile_index)
        {
            return false;
        }
        let sequence = self.next_front;
        self.next_front -= 1;
        self.pending.insert(sequence, item);
        self.newest_by_tile.entry(item.tile_index).or_insert(sequence);
        true
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.newest_by_tile.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> + '_ {
        self.pending.values()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(WorkQueueConfig::default())
    }
}

pub fn order(columns: u32, rows: u32, motion_x: f64, motion_y: f64) -> Vec<usize> {
    if motion_x == 0.0 && motion_y == 0.0 {
        return spiral_outward(columns, rows);
    }
    directional(columns, rows, motion_x, motion_y)
}

/// Center-out square spiral: right, down, left, up with step lengths 1, 1, 2, 2, 3, 3...
///
/// The Chebyshev ring of visited tiles never decreases.
pub fn spiral_outward(columns: u32, rows: u32) -> Vec<usize> {
    let tile_count = (columns as usize) * (rows as usize);
    let mut result = Vec::with_capacity(tile_count);
    if tile_count == 0 {
        return result;
    }
    const DIRECTIONS: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];
    let (columns, rows) = (i64::from(columns), i64::from(rows));
    let (mut x, mut y) = (columns / 2, rows / 2);
    let mut direction = 0;
    let mut steps = 1;
    result.push((y * columns + x) as usize);

    while result.len() < tile_count {
        for _ in 0..2 {
            let (dx, dy) = DIRECTIONS[direction];
            for _ in 0..steps {
                x += dx;
                y += dy;
                if (0..columns).contains(&x) && (0..rows).contains(&y) {
                    result.push((y * columns + x) as usize);
                }
            }
            direction = (direction + 1) % DIRECTIONS.len();
        }
        steps += 1;
    }
    result
}

fn directional(columns: u32, rows: u32, motion_x: f64, motion_y: f64) -> Vec<usize> {
    let column_order: Vec<u32> = if motion_x > 0.0 {
        (0..columns).rev().collect()
    } else {
        (0..columns).collect()
    };
    let row_order: Vec<u32> = if motion_y > 0.0 {
        (0..rows).rev().collect()
    } else {
        (0..rows).collect()
    };
    let index = |column: u32, row: u32| (row as usize) * (columns as usize) + column as usize;

    let mut result = Vec::with_capacity(column_order.len() * row_order.len());
    if motion_x.abs() >= motion_y.abs() {
        for &column in &column_order {
            result.extend(row_order.iter().map(|&row| index(column, row)));
        }
    } else {
        for &row in &row_order {
            result.extend(column_order.iter().map(|&column| index(column, row)));
        }
    }
    result
}
