use crate::runtime::task::TaskId;
use crate::utils::{Pool, PoolError};

use tracing::warn;

struct Node {
    task: TaskId,
    next: usize,
    prev: usize,
}

/// Circular list of runnable tasks, swept by a cursor.
///
/// `push` appends behind the cursor, so a task that stays in the list is
/// reached again only after every other node. Removing the cursor node
/// (`erase` or `pop`) moves the cursor to its successor and makes the
/// following [`mv_next`](Self::mv_next) a no-op, so one sweep visits each
/// live node exactly once even when nodes leave mid-sweep.
pub(crate) struct ReadyQueue {
    nodes: Pool<Node>,
    head: Option<usize>,
    count: usize,
    popped: bool,
}

impl ReadyQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        Ok(Self {
            nodes: Pool::with_capacity(capacity)?,
            head: None,
            count: 0,
            popped: false,
        })
    }

    /// Appends `task` at the tail, just behind the cursor.
    pub(crate) fn push(&mut self, task: TaskId) {
        self.link(task);
    }

    /// Inserts `task` at the cursor, so it is the next one resumed.
    pub(crate) fn push_head(&mut self, task: TaskId) {
        let index = self.link(task);
        self.head = Some(index);
    }

    /// Task at the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub(crate) fn get(&self) -> TaskId {
        self.node(self.cursor()).task
    }

    /// Advances the cursor, unless the cursor node was just removed.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty and nothing was removed.
    pub(crate) fn mv_next(&mut self) {
        if self.popped {
            self.popped = false;
            return;
        }

        let cursor = self.cursor();
        self.head = Some(self.node(cursor).next);
    }

    /// Unlinks the cursor node of a task that stays alive elsewhere.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub(crate) fn erase(&mut self) -> TaskId {
        self.unlink()
    }

    /// Unlinks the cursor node of a task that is being reaped.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub(crate) fn pop(&mut self) -> TaskId {
        self.unlink()
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Removes every node, returning the tasks in cursor order.
    pub(crate) fn drain(&mut self) -> Vec<TaskId> {
        let mut tasks = Vec::with_capacity(self.len());
        while !self.is_empty() {
            tasks.push(self.unlink());
        }
        self.popped = false;
        tasks
    }

    fn cursor(&self) -> usize {
        self.head.expect("ready queue is empty")
    }

    fn node(&self, index: usize) -> &Node {
        self.nodes.get(index).expect("ready queue node is not live")
    }

    fn node_mut(&mut self, index: usize) -> &mut Node {
        self.nodes
            .get_mut(index)
            .expect("ready queue node is not live")
    }

    /// Links a new node just before the cursor and returns its index.
    fn link(&mut self, task: TaskId) -> usize {
        let index = self.nodes.insert_with(|index| Node {
            task,
            next: index,
            prev: index,
        });

        if let Some(head) = self.head {
            let tail = self.node(head).prev;

            let node = self.node_mut(index);
            node.next = head;
            node.prev = tail;

            self.node_mut(tail).next = index;
            self.node_mut(head).prev = index;
        } else {
            self.head = Some(index);
        }

        self.count += 1;
        index
    }

    fn unlink(&mut self) -> TaskId {
        let index = self.cursor();
        let node = self.nodes.remove(index);

        if node.next == index {
            self.head = None;
        } else {
            self.node_mut(node.prev).next = node.next;
            self.node_mut(node.next).prev = node.prev;
            self.head = Some(node.next);
        }

        self.count -= 1;
        self.popped = true;
        node.task
    }
}

impl Drop for ReadyQueue {
    fn drop(&mut self) {
        if self.count > 0 {
            warn!(nodes = self.count, "ready queue dropped with live nodes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReadyQueue;

    fn queue(tasks: &[usize]) -> ReadyQueue {
        let mut queue = ReadyQueue::with_capacity(4).unwrap();
        for &task in tasks {
            queue.push(task);
        }
        queue
    }

    /// Follows `next` from the cursor back to it, checking `prev` on the way.
    fn walk(queue: &ReadyQueue) -> Vec<usize> {
        let Some(head) = queue.head else {
            return Vec::new();
        };

        let mut order = Vec::new();
        let mut index = head;
        loop {
            let node = queue.node(index);
            assert_eq!(queue.node(node.next).prev, index);
            order.push(node.task);

            index = node.next;
            if index == head {
                break;
            }
        }
        order
    }

    #[test]
    fn cursor_sweeps_in_push_order() {
        let mut queue = queue(&[1, 2, 3]);

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(queue.get());
            queue.mv_next();
        }

        assert_eq!(seen, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn count_matches_reachable_nodes() {
        let mut queue = queue(&[1, 2, 3, 4, 5]);
        assert_eq!(walk(&queue), vec![1, 2, 3, 4, 5]);

        queue.mv_next();
        assert_eq!(queue.erase(), 2);
        assert_eq!(walk(&queue).len(), queue.len());

        queue.mv_next();
        assert_eq!(queue.get(), 3);
        assert_eq!(queue.pop(), 3);
        queue.mv_next();
        assert_eq!(walk(&queue), vec![4, 5, 1]);
        assert_eq!(queue.len(), 3);

        queue.push(6);
        assert_eq!(walk(&queue), vec![4, 5, 1, 6]);
    }

    #[test]
    fn removal_mid_sweep_visits_each_node_once() {
        let mut queue = queue(&[1, 2, 3, 4]);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let task = queue.get();
            seen.push(task);
            if task % 2 == 0 {
                queue.pop();
            }
            queue.mv_next();
        }

        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(walk(&queue), vec![1, 3]);
    }

    #[test]
    fn single_node_links_to_itself() {
        let mut queue = queue(&[9]);
        assert_eq!(walk(&queue), vec![9]);

        queue.mv_next();
        assert_eq!(queue.get(), 9);

        assert_eq!(queue.erase(), 9);
        assert!(queue.is_empty());
        queue.mv_next();
        assert!(queue.head.is_none());
    }

    #[test]
    fn push_head_jumps_the_line() {
        let mut queue = queue(&[1, 2]);
        queue.push_head(7);

        assert_eq!(queue.get(), 7);
        assert_eq!(walk(&queue), vec![7, 1, 2]);
    }

    #[test]
    fn node_slots_are_recycled() {
        let mut queue = queue(&[1, 2]);
        queue.pop();
        queue.mv_next();
        queue.push(3);

        assert_eq!(queue.nodes.len(), 2);
        assert_eq!(queue.drain(), vec![2, 3]);
        assert!(queue.nodes.is_empty());
    }

    #[test]
    #[should_panic(expected = "ready queue is empty")]
    fn get_on_empty_queue_panics() {
        queue(&[]).get();
    }
}
