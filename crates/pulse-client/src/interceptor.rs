//! The generic interceptor pipeline (§4.6) used uniformly for request- and response-transforming
//! chains by the query/mutation/subscription clients.

/// An id handed back by [`InterceptorPipeline::use_interceptor`], usable later with
/// [`InterceptorPipeline::eject`].
pub type InterceptorId = u64;

struct Pair<Value, Err> {
    id: InterceptorId,
    primary: Box<dyn Fn(Value) -> Result<Value, Err>>,
    secondary: Option<Box<dyn Fn(Err) -> Result<Value, Err>>>,
}

/// An ordered chain of `{primary, secondary}` handler pairs.
///
/// `run` feeds a value through every primary in registration order. If a primary returns `Err`
/// and its own pair carries a `secondary`, the secondary gets a chance to recover (returning a
/// replacement value); otherwise the error propagates to the caller, stopping the chain.
///
/// Used symmetrically: a request pipeline transforms an outgoing value before dispatch, a
/// response pipeline transforms an incoming value after dispatch.
pub struct InterceptorPipeline<Value, Err> {
    pairs: Vec<Pair<Value, Err>>,
    next_id: InterceptorId,
}

impl<Value, Err> Default for InterceptorPipeline<Value, Err> {
    fn default() -> Self {
        InterceptorPipeline {
            pairs: Vec::new(),
            next_id: 0,
        }
    }
}

impl<Value, Err> InterceptorPipeline<Value, Err> {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new `{primary, secondary}` pair at the end of the chain, returning an id that
    /// can later be passed to [`InterceptorPipeline::eject`].
    pub fn use_interceptor(
        &mut self,
        primary: impl Fn(Value) -> Result<Value, Err> + 'static,
        secondary: Option<impl Fn(Err) -> Result<Value, Err> + 'static>,
    ) -> InterceptorId {
        let id = self.next_id;
        self.next_id += 1;
        self.pairs.push(Pair {
            id,
            primary: Box::new(primary),
            secondary: secondary.map(|s| Box::new(s) as Box<dyn Fn(Err) -> Result<Value, Err>>),
        });
        id
    }

    /// Removes a previously-registered pair by id. A no-op if the id is unknown (already ejected,
    /// or never registered).
    pub fn eject(&mut self, id: InterceptorId) {
        self.pairs.retain(|pair| pair.id != id);
    }

    /// Removes every registered pair.
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.next_id = 0;
    }

    /// The number of pairs currently registered.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the pipeline currently has no pairs registered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Runs `value` through every primary in sequence. A primary's error either routes to its own
    /// pair's secondary (which may recover and let the chain continue) or, if there is none,
    /// propagates immediately, skipping the remaining pairs.
    pub fn run(&self, mut value: Value) -> Result<Value, Err> {
        for pair in &self.pairs {
            value = match (pair.primary)(value) {
                Ok(v) => v,
                Err(e) => match &pair.secondary {
                    Some(secondary) => secondary(e)?,
                    None => return Err(e),
                },
            };
        }
        Ok(value)
    }
}
