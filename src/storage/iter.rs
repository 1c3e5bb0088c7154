//! Lazy iteration over a map.
//!
//! Iterators walk the table in primary key order one page at a time, using
//! the last seen id as a keyset cursor (`WHERE id > ?`). Only the current page
//! is held in memory and no statement stays open between pages, so an
//! iterator can be dropped at any point without leaking a cursor or holding
//! the connection lock. For `WITHOUT ROWID` tables primary key order is the
//! storage order.
//!
//! Rows written or deleted while an iteration is in flight are seen or missed
//! according to their position relative to the cursor.

use super::map::SqlMap;
use crate::codec;
use crate::models::Value;
use crate::Result;
use std::collections::VecDeque;

/// Page-at-a-time row source shared by the public iterators.
struct Pager {
    map: SqlMap,
    with_values: bool,
    cursor: Option<String>,
    buffer: VecDeque<(String, Option<String>)>,
    exhausted: bool,
}

impl Pager {
    const fn new(map: SqlMap, with_values: bool) -> Self {
        Self {
            map,
            with_values,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn next_row(&mut self) -> Option<Result<(String, Option<String>)>> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.map.fetch_page(self.cursor.as_deref(), self.with_values) {
                Ok(rows) => {
                    if rows.len() < self.map.page_size() {
                        self.exhausted = true;
                    }
                    if let Some((last, _)) = rows.last() {
                        self.cursor = Some(last.clone());
                    }
                    self.buffer.extend(rows);
                },
                Err(e) => {
                    // An error ends the iteration.
                    self.exhausted = true;
                    return Some(Err(e));
                },
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Iterator over the ids of a map. Created by [`SqlMap::keys`].
pub struct Keys {
    pager: Pager,
}

impl Keys {
    pub(crate) const fn new(map: SqlMap) -> Self {
        Self {
            pager: Pager::new(map, false),
        }
    }
}

impl Iterator for Keys {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pager.next_row().map(|row| row.map(|(id, _)| id))
    }
}

/// Iterator over the decoded values of a map. Created by [`SqlMap::values`].
pub struct Values {
    pager: Pager,
}

impl Values {
    pub(crate) const fn new(map: SqlMap) -> Self {
        Self {
            pager: Pager::new(map, true),
        }
    }
}

impl Iterator for Values {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pager
            .next_row()
            .map(|row| row.and_then(|(id, raw)| codec::decode_column(&id, raw.as_deref())))
    }
}

/// Iterator over `(id, value)` pairs of a map. Created by [`SqlMap::entries`].
pub struct Entries {
    pager: Pager,
}

impl Entries {
    pub(crate) const fn new(map: SqlMap) -> Self {
        Self {
            pager: Pager::new(map, true),
        }
    }
}

impl Iterator for Entries {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pager.next_row().map(|row| {
            row.and_then(|(id, raw)| {
                let value = codec::decode_column(&id, raw.as_deref())?;
                Ok((id, value))
            })
        })
    }
}

impl std::iter::FusedIterator for Keys {}
impl std::iter::FusedIterator for Values {}
impl std::iter::FusedIterator for Entries {}
