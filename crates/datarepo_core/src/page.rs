//! Paging and sorting value types.
//!
//! # Invariants
//! - `PageRequest::size` is always greater than zero.
//! - `Page::total_pages` is `ceil(total_elements / size)`.
//! - `Page::content.len() <= size`.

use crate::repo::{RepoError, RepoResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Ordering on one entity property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn new(property: impl Into<String>, direction: Direction) -> Self {
        Self {
            property: property.into(),
            direction,
        }
    }

    pub fn asc(property: impl Into<String>) -> Self {
        Self::new(property, Direction::Asc)
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::new(property, Direction::Desc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    /// Sort on `properties` in `direction`.
    pub fn by(direction: Direction, properties: &[&str]) -> Self {
        Self {
            orders: properties
                .iter()
                .map(|property| Order::new(*property, direction))
                .collect(),
        }
    }

    /// Appends `order` as a tie breaker.
    pub fn and(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }
}

impl From<Order> for Sort {
    fn from(order: Order) -> Self {
        Self {
            orders: vec![order],
        }
    }
}

/// Zero-based page index, page size and sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u64,
    size: u64,
    sort: Sort,
}

impl PageRequest {
    /// # Errors
    /// - `InvalidPageRequest` when `size` is zero.
    pub fn of(page: u64, size: u64) -> RepoResult<Self> {
        Self::of_sorted(page, size, Sort::unsorted())
    }

    pub fn of_sorted(page: u64, size: u64, sort: Sort) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidPageRequest(
                "page size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { page, size, sort })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn previous_or_first(&self) -> Self {
        Self {
            page: self.page.saturating_sub(1),
            ..self.clone()
        }
    }

    /// Same request with `size` capped at `max`.
    pub(crate) fn clamped(&self, max: u64) -> Self {
        Self {
            size: self.size.min(max.max(1)),
            ..self.clone()
        }
    }
}

/// One slice of a larger result with its totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub number: u64,
    pub size: u64,
    pub total_elements: u64,
    pub sort: Sort,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.page(),
            size: request.size(),
            total_elements,
            sort: request.sort().clone(),
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(self.size)
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn has_next(&self) -> bool {
        self.number + 1 < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn is_first(&self) -> bool {
        !self.has_previous()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    /// Converts the content, keeping paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
            sort: self.sort,
        }
    }
}
