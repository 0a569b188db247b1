//! Open troves as a doubly linked list ordered by nominal collateral ratio, highest first.
//!
//! Nodes live in persistent storage. Inserts take a pair of hints for the expected
//! neighbours; a correct pair links in constant time and a stale pair falls back to a
//! walk that starts from whichever hint is still usable, or from the head.

use soroban_sdk::{Address, Env, contracttype};

use crate::{
    Error,
    storage::{self, SortedNode},
};

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SortedList {
    pub head: Option<Address>,
    pub tail: Option<Address>,
    pub size: u32,
}

fn node_nicr(env: &Env, id: &Address) -> Option<i128> {
    storage::get_node(env, id).map(|node| node.nicr)
}

fn update_node(env: &Env, id: &Address, f: impl FnOnce(&mut SortedNode)) {
    if let Some(mut node) = storage::get_node(env, id) {
        f(&mut node);
        storage::set_node(env, id, &node);
    }
}

impl SortedList {
    pub fn contains(&self, env: &Env, id: &Address) -> bool {
        storage::get_node(env, id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn first(&self) -> Option<Address> {
        self.head.clone()
    }

    pub fn last(&self) -> Option<Address> {
        self.tail.clone()
    }

    /// Neighbour with the next lower ratio
    pub fn next(&self, env: &Env, id: &Address) -> Option<Address> {
        storage::get_node(env, id).and_then(|node| node.next)
    }

    /// Neighbour with the next higher ratio
    pub fn prev(&self, env: &Env, id: &Address) -> Option<Address> {
        storage::get_node(env, id).and_then(|node| node.prev)
    }

    pub fn insert(
        &mut self,
        env: &Env,
        id: &Address,
        nicr: i128,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> Result<(), Error> {
        if self.contains(env, id) {
            return Err(Error::AlreadyOpen);
        }
        if nicr <= 0 {
            return Err(Error::InvalidAmount);
        }

        let (prev, next) = if self.valid_insert_position(env, nicr, &prev_hint, &next_hint) {
            (prev_hint, next_hint)
        } else {
            self.find_insert_position(env, nicr, prev_hint, next_hint)
        };

        match (&prev, &next) {
            (None, None) => {
                self.head = Some(id.clone());
                self.tail = Some(id.clone());
            }
            (None, Some(next_id)) => {
                update_node(env, next_id, |node| node.prev = Some(id.clone()));
                self.head = Some(id.clone());
            }
            (Some(prev_id), None) => {
                update_node(env, prev_id, |node| node.next = Some(id.clone()));
                self.tail = Some(id.clone());
            }
            (Some(prev_id), Some(next_id)) => {
                update_node(env, prev_id, |node| node.next = Some(id.clone()));
                update_node(env, next_id, |node| node.prev = Some(id.clone()));
            }
        }

        storage::set_node(env, id, &SortedNode { nicr, prev, next });
        self.size += 1;
        Ok(())
    }

    pub fn remove(&mut self, env: &Env, id: &Address) -> Result<(), Error> {
        let Some(node) = storage::get_node(env, id) else {
            return Err(Error::NotOpen);
        };

        match (&node.prev, &node.next) {
            (None, None) => {
                self.head = None;
                self.tail = None;
            }
            (None, Some(next_id)) => {
                update_node(env, next_id, |next| next.prev = None);
                self.head = Some(next_id.clone());
            }
            (Some(prev_id), None) => {
                update_node(env, prev_id, |prev| prev.next = None);
                self.tail = Some(prev_id.clone());
            }
            (Some(prev_id), Some(next_id)) => {
                update_node(env, prev_id, |prev| prev.next = Some(next_id.clone()));
                update_node(env, next_id, |next| next.prev = Some(prev_id.clone()));
            }
        }

        storage::remove_node(env, id);
        self.size -= 1;
        Ok(())
    }

    /// Moves an existing node to the position for its new ratio
    pub fn re_insert(
        &mut self,
        env: &Env,
        id: &Address,
        nicr: i128,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> Result<(), Error> {
        self.remove(env, id)?;
        self.insert(env, id, nicr, prev_hint, next_hint)
    }

    pub fn valid_insert_position(
        &self,
        env: &Env,
        nicr: i128,
        prev: &Option<Address>,
        next: &Option<Address>,
    ) -> bool {
        match (prev, next) {
            (None, None) => self.is_empty(),
            (None, Some(next_id)) => {
                self.head.as_ref() == Some(next_id)
                    && node_nicr(env, next_id).is_some_and(|next_nicr| nicr >= next_nicr)
            }
            (Some(prev_id), None) => {
                self.tail.as_ref() == Some(prev_id)
                    && node_nicr(env, prev_id).is_some_and(|prev_nicr| nicr <= prev_nicr)
            }
            (Some(prev_id), Some(next_id)) => {
                self.next(env, prev_id).as_ref() == Some(next_id)
                    && node_nicr(env, prev_id).is_some_and(|prev_nicr| prev_nicr >= nicr)
                    && node_nicr(env, next_id).is_some_and(|next_nicr| nicr >= next_nicr)
            }
        }
    }

    pub fn find_insert_position(
        &self,
        env: &Env,
        nicr: i128,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> (Option<Address>, Option<Address>) {
        // a hint is only a usable starting point if it is still listed on the right side of `nicr`
        let prev =
            prev_hint.filter(|id| node_nicr(env, id).is_some_and(|prev_nicr| nicr <= prev_nicr));
        let next =
            next_hint.filter(|id| node_nicr(env, id).is_some_and(|next_nicr| nicr >= next_nicr));

        match (prev, next) {
            (None, None) => match &self.head {
                Some(head) => self.descend_list(env, nicr, head),
                None => (None, None),
            },
            (None, Some(next_id)) => self.ascend_list(env, nicr, &next_id),
            (Some(prev_id), _) => self.descend_list(env, nicr, &prev_id),
        }
    }

    fn descend_list(
        &self,
        env: &Env,
        nicr: i128,
        start: &Address,
    ) -> (Option<Address>, Option<Address>) {
        if self.head.as_ref() == Some(start)
            && node_nicr(env, start).is_some_and(|start_nicr| nicr >= start_nicr)
        {
            return (None, Some(start.clone()));
        }

        let mut prev = Some(start.clone());
        let mut next = self.next(env, start);
        while prev.is_some() && !self.valid_insert_position(env, nicr, &prev, &next) {
            prev = next;
            next = prev.as_ref().and_then(|id| self.next(env, id));
        }
        (prev, next)
    }

    fn ascend_list(
        &self,
        env: &Env,
        nicr: i128,
        start: &Address,
    ) -> (Option<Address>, Option<Address>) {
        if self.tail.as_ref() == Some(start)
            && node_nicr(env, start).is_some_and(|start_nicr| nicr <= start_nicr)
        {
            return (Some(start.clone()), None);
        }

        let mut next = Some(start.clone());
        let mut prev = self.prev(env, start);
        while next.is_some() && !self.valid_insert_position(env, nicr, &prev, &next) {
            next = prev;
            prev = next.as_ref().and_then(|id| self.prev(env, id));
        }
        (prev, next)
    }
}
