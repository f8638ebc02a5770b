/// Preserves in sorted (descending) order the top N elements.
///
/// Unlike a heap, the smallest kept element is always at hand, which makes it
/// usable as a running cutoff while candidates are generated.
///
/// # Example
///
/// ```
/// use tagseek::utils::top_n::TopN;
///
/// let mut top_3 = TopN::new(3);
/// for v in [1, 2, 3, 3, 12] {
///     top_3.push(v);
/// }
///
/// assert_eq!(top_3.as_slice(), &[12, 3, 3]);
/// assert_eq!(top_3.max_val(), Some(&12));
/// assert_eq!(top_3.min_val(), Some(&3));
/// assert!(!top_3.accepts(&2));
/// ```
#[derive(Debug, Clone)]
pub struct TopN<T: Ord> {
    values: Vec<T>,
    capacity: usize,
}

impl<T: Ord> TopN<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.saturating_add(1).min(4096)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn max_val(&self) -> Option<&T> {
        self.values.first()
    }

    /// Smallest kept value, the cutoff new values must beat once full.
    pub fn min_val(&self) -> Option<&T> {
        self.values.last()
    }

    /// Whether `value` would be kept by [`TopN::push`].
    pub fn accepts(&self, value: &T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        match self.values.last() {
            Some(last) if self.is_full() => value > last,
            _ => true,
        }
    }

    /// Inserts a value, evicting the smallest when over capacity.
    /// Returns `false` if the value was not kept.
    pub fn push(&mut self, value: T) -> bool {
        if !self.accepts(&value) {
            return false;
        }
        // First slot whose value is strictly smaller keeps equal values stable.
        let pos = self.values.partition_point(|v| *v >= value);
        self.values.insert(pos, value);
        if self.values.len() > self.capacity {
            self.values.pop();
        }
        true
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    pub fn into_sorted_vec(self) -> Vec<T> {
        self.values
    }
}
