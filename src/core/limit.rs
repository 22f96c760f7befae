// Row limiters consulted before each row is scanned.

/// Decides whether to stop before including the current row.
///
/// `row_count` counts the current row, so it starts at 1.
pub trait Limiter: Send + Sync {
    fn limit_reached(&self, row_count: usize) -> bool;
}

impl<F> Limiter for F
where
    F: Fn(usize) -> bool + Send + Sync,
{
    fn limit_reached(&self, row_count: usize) -> bool {
        self(row_count)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl Limiter for Unlimited {
    fn limit_reached(&self, _row_count: usize) -> bool {
        false
    }
}

/// Produces at most `.0` rows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MaxRows(pub usize);

impl Limiter for MaxRows {
    fn limit_reached(&self, row_count: usize) -> bool {
        row_count > self.0
    }
}
