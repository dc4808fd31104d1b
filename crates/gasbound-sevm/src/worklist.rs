// SPDX-License-Identifier: AGPL-3.0

//! Pending paths of the exploration

/// Depth-first worklist with a ceiling on the number of paths ever spawned
///
/// Every accepted item counts as one path; the root item included. Once
/// `max_paths` is reached further items are refused and the caller ends
/// them as limit-reached instead.
#[derive(Debug)]
pub struct Worklist<T> {
    stack: Vec<T>,
    spawned: usize,
    completed: usize,
    max_paths: usize,
}

impl<T> Worklist<T> {
    pub fn new(max_paths: usize) -> Self {
        Self {
            stack: Vec::new(),
            spawned: 0,
            completed: 0,
            max_paths,
        }
    }

    /// Accept `item` unless the path ceiling is reached; returns it back
    /// when refused
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.spawned >= self.max_paths {
            return Err(item);
        }
        self.spawned += 1;
        self.stack.push(item);
        Ok(())
    }

    /// Re-queue an item that was already counted
    pub fn resume(&mut self, item: T) {
        self.stack.push(item);
    }

    /// Last in, first out
    pub fn pop(&mut self) -> Option<T> {
        self.stack.pop()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn mark_completed(&mut self) {
        self.completed += 1;
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.stack.iter()
    }
}

impl<T> std::ops::Index<usize> for Worklist<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.stack[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worklist_dfs() {
        let mut worklist: Worklist<i32> = Worklist::new(10);

        worklist.push(1).unwrap();
        worklist.push(2).unwrap();
        worklist.push(3).unwrap();
        assert_eq!(worklist.len(), 3);

        // DFS: last in, first out
        assert_eq!(worklist.pop(), Some(3));
        assert_eq!(worklist.pop(), Some(2));
        assert_eq!(worklist.pop(), Some(1));
        assert_eq!(worklist.pop(), None);
        assert!(worklist.is_empty());
    }

    #[test]
    fn test_worklist_ceiling() {
        let mut worklist: Worklist<i32> = Worklist::new(2);

        assert!(worklist.push(1).is_ok());
        assert!(worklist.push(2).is_ok());
        assert_eq!(worklist.push(3), Err(3));
        assert_eq!(worklist.spawned(), 2);

        // Continuing a path does not count against the ceiling
        let item = worklist.pop().unwrap();
        worklist.resume(item);
        assert_eq!(worklist.len(), 2);
        assert_eq!(worklist.spawned(), 2);
    }

    #[test]
    fn test_worklist_completed_count() {
        let mut worklist: Worklist<i32> = Worklist::new(1);

        assert_eq!(worklist.completed(), 0);
        worklist.mark_completed();
        worklist.mark_completed();
        assert_eq!(worklist.completed(), 2);
    }

    #[test]
    fn test_worklist_index_and_iter() {
        let mut worklist: Worklist<i32> = Worklist::new(5);

        worklist.push(10).unwrap();
        worklist.push(20).unwrap();

        assert_eq!(worklist[0], 10);
        assert_eq!(worklist[1], 20);
        let items: Vec<&i32> = worklist.iter().collect();
        assert_eq!(items, vec![&10, &20]);
    }
}
