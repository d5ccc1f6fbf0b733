use std::fmt;
use std::iter::Peekable;

/// Lazily materialised iterator of fallible items
pub type SourceIter<P> = Box<dyn Iterator<Item = anyhow::Result<P>> + Send>;

/// Deferred constructor of a source iterator
pub type Supplier<P> = Box<dyn FnOnce() -> anyhow::Result<SourceIter<P>> + Send>;

/// Leaf stage: yields the items of a supplied iterator on demand.
///
/// The supplier is only invoked on the first call to [`is_exhausted`] or
/// [`next`], so an unpulled source never touches its backing store.
///
/// [`is_exhausted`]: SourceOperator::is_exhausted
/// [`next`]: SourceOperator::next
pub struct SourceOperator<P> {
    supplier: Option<Supplier<P>>,
    iter: Option<Peekable<SourceIter<P>>>,
    exhausted: bool,
}

impl<P> SourceOperator<P> {
    pub fn new(supplier: Supplier<P>) -> Self {
        Self {
            supplier: Some(supplier),
            iter: None,
            exhausted: false,
        }
    }

    pub fn from_items(items: Vec<P>) -> Self
    where
        P: Send + 'static,
    {
        Self::new(Box::new(move || {
            Ok(Box::new(items.into_iter().map(Ok::<P, anyhow::Error>)) as SourceIter<P>)
        }))
    }

    fn materialise(&mut self) -> anyhow::Result<Option<&mut Peekable<SourceIter<P>>>> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(supplier) = self.supplier.take() {
            self.iter = Some(supplier()?.peekable());
        }
        Ok(self.iter.as_mut())
    }

    /// Whether no further item will be produced. Materialises the iterator.
    pub fn is_exhausted(&mut self) -> anyhow::Result<bool> {
        let more = match self.materialise()? {
            Some(iter) => iter.peek().is_some(),
            None => false,
        };
        if !more {
            self.exhausted = true;
            self.iter = None;
        }
        Ok(!more)
    }

    /// Next item, `Ok(None)` once exhausted.
    pub fn next(&mut self) -> anyhow::Result<Option<P>> {
        let next = match self.materialise()? {
            Some(iter) => iter.next(),
            None => None,
        };
        match next {
            Some(item) => item.map(Some),
            None => {
                self.exhausted = true;
                self.iter = None;
                Ok(None)
            }
        }
    }
}

impl<P> fmt::Debug for SourceOperator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceOperator")
            .field("materialised", &self.supplier.is_none())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
