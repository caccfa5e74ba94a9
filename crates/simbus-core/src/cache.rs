//! Per-subsimulator get/set caches with user-installable value modifiers.
//!
//! Each subsimulator owns one [`GetCache`] and one [`SetCache`] per numeric
//! type plus string. The get side caches the last values read from the slave
//! and applies output modifiers to them; the set side buffers pending input
//! writes between macro steps and applies input modifiers just before the
//! batched slave write.
//!
//! The set-cache keeps a sparse send buffer: a variable occupies a buffer
//! slot only while it has a pending write this tick, so repeated `set` calls
//! are O(1) and the per-step wire traffic is proportional to the variables
//! actually written, not to the variables exposed.

use crate::model::ValueReference;
use crate::time::Duration;
use std::collections::HashMap;

/// A user-installed value modifier, applied on every get or set as
/// `modified = f(original, delta_t)`.
pub type Modifier<T> = Box<dyn Fn(T, Duration) -> T + Send>;

/// Predicate for filtering the send buffer in [`SetCache::modify_and_get`].
pub type SendFilter<'f, T> = &'f dyn Fn(ValueReference, &T) -> bool;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by the I/O caches.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The variable was never exposed to this cache.
    #[error("variable with reference {0} not found in exposed variables")]
    NotExposed(ValueReference),
    /// A write arrived after the modifiers already ran for the current tick.
    #[error("modifiers have already run for the current tick")]
    ModifiersAlreadyRun,
}

// ---------------------------------------------------------------------------
// GetCache
// ---------------------------------------------------------------------------

/// Caches values read from the slave and applies output modifiers.
///
/// After each bulk slave read, the caller fills [`GetCache::original_values_mut`]
/// and invokes [`GetCache::run_modifiers`]; [`GetCache::get`] then serves the
/// modified values.
pub struct GetCache<T> {
    references: Vec<ValueReference>,
    original_values: Vec<T>,
    modified_values: Vec<T>,
    modifiers: Vec<Option<Modifier<T>>>,
    index_of: HashMap<ValueReference, usize>,
}

impl<T: Clone + Default> Default for GetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> GetCache<T> {
    pub fn new() -> Self {
        Self {
            references: Vec::new(),
            original_values: Vec::new(),
            modified_values: Vec::new(),
            modifiers: Vec::new(),
            index_of: HashMap::new(),
        }
    }

    /// Register a reference for reading. Idempotent; both the original and
    /// the modified value start out as the type's zero.
    pub fn expose(&mut self, reference: ValueReference) {
        if self.index_of.contains_key(&reference) {
            return;
        }
        self.references.push(reference);
        self.original_values.push(T::default());
        self.modified_values.push(T::default());
        self.modifiers.push(None);
        self.index_of.insert(reference, self.references.len() - 1);
    }

    /// The *modified* value of an exposed variable.
    pub fn get(&self, reference: ValueReference) -> Result<&T, CacheError> {
        let index = self
            .index_of
            .get(&reference)
            .ok_or(CacheError::NotExposed(reference))?;
        Ok(&self.modified_values[*index])
    }

    /// Install or clear an output modifier for an exposed variable.
    pub fn set_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<T>>,
    ) -> Result<(), CacheError> {
        let index = self
            .index_of
            .get(&reference)
            .ok_or(CacheError::NotExposed(reference))?;
        self.modifiers[*index] = modifier;
        Ok(())
    }

    /// Recompute all modified values from the originals. Must be called after
    /// every bulk slave read.
    pub fn run_modifiers(&mut self, delta_t: Duration) {
        for i in 0..self.original_values.len() {
            self.modified_values[i] = match &self.modifiers[i] {
                Some(m) => m(self.original_values[i].clone(), delta_t),
                None => self.original_values[i].clone(),
            };
        }
    }

    /// The exposed references, in the order used by the value buffers.
    pub fn references(&self) -> &[ValueReference] {
        &self.references
    }

    /// The original (pre-modifier) value buffer, for bulk-filling after a
    /// slave read. Its layout matches [`GetCache::references`].
    pub fn original_values_mut(&mut self) -> &mut [T] {
        &mut self.original_values
    }

    /// The reference list and the original value buffer together, for a
    /// single bulk slave read.
    pub fn read_targets(&mut self) -> (&[ValueReference], &mut [T]) {
        (&self.references, &mut self.original_values)
    }
}

// ---------------------------------------------------------------------------
// SetCache
// ---------------------------------------------------------------------------

struct ExposedVariable<T> {
    /// The last value set for the variable.
    last_value: T,
    /// The variable's slot in the send buffer, or `None` if it has no
    /// pending write this tick.
    buffer_index: Option<usize>,
}

/// Buffers pending input writes between macro steps and applies input
/// modifiers.
pub struct SetCache<T> {
    exposed: HashMap<ValueReference, ExposedVariable<T>>,
    /// Installed modifiers, in insertion order. At most one per reference.
    modifiers: Vec<(ValueReference, Modifier<T>)>,
    has_run_modifiers: bool,
    /// The references and values to be sent next.
    references: Vec<ValueReference>,
    values: Vec<T>,
    references_filtered: Vec<ValueReference>,
    values_filtered: Vec<T>,
}

impl<T: Clone + Default> Default for SetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> SetCache<T> {
    pub fn new() -> Self {
        Self {
            exposed: HashMap::new(),
            modifiers: Vec::new(),
            has_run_modifiers: false,
            references: Vec::new(),
            values: Vec::new(),
            references_filtered: Vec::new(),
            values_filtered: Vec::new(),
        }
    }

    /// Register a reference for writing, seeding its last-known value.
    /// A reference that is already exposed keeps its current value.
    pub fn expose(&mut self, reference: ValueReference, start_value: T) {
        self.exposed.entry(reference).or_insert(ExposedVariable {
            last_value: start_value,
            buffer_index: None,
        });
    }

    /// Record a pending write. Appends to the send buffer on the first write
    /// of the tick and overwrites the existing slot on subsequent writes.
    pub fn set_value(&mut self, reference: ValueReference, value: T) -> Result<(), CacheError> {
        if self.has_run_modifiers {
            return Err(CacheError::ModifiersAlreadyRun);
        }
        let entry = self
            .exposed
            .get_mut(&reference)
            .ok_or(CacheError::NotExposed(reference))?;
        entry.last_value = value.clone();
        match entry.buffer_index {
            Some(index) => {
                debug_assert_eq!(self.references[index], reference);
                self.values[index] = value;
            }
            None => {
                entry.buffer_index = Some(self.references.len());
                self.references.push(reference);
                self.values.push(value);
            }
        }
        Ok(())
    }

    /// Install or clear an input modifier. Installing ensures the variable is
    /// present in the send buffer, so the modifier is applied at least once
    /// per tick even if nothing writes the variable.
    pub fn set_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<T>>,
    ) -> Result<(), CacheError> {
        if self.has_run_modifiers {
            return Err(CacheError::ModifiersAlreadyRun);
        }
        let entry = self
            .exposed
            .get_mut(&reference)
            .ok_or(CacheError::NotExposed(reference))?;
        if entry.buffer_index.is_none() {
            entry.buffer_index = Some(self.references.len());
            self.references.push(reference);
            self.values.push(entry.last_value.clone());
        }
        self.modifiers.retain(|(r, _)| *r != reference);
        if let Some(m) = modifier {
            self.modifiers.push((reference, m));
        }
        Ok(())
    }

    /// Apply all modifiers (in insertion order) and return the send buffer.
    ///
    /// Idempotent within a tick: the first call runs the modifiers, later
    /// calls return the cached post-modifier buffers. The optional predicate
    /// filters the returned buffer; it is used during setup to skip constant
    /// and input-causality variables.
    pub fn modify_and_get(
        &mut self,
        delta_t: Duration,
        filter: Option<SendFilter<'_, T>>,
    ) -> (&[ValueReference], &[T]) {
        if !self.has_run_modifiers {
            for (reference, modifier) in &self.modifiers {
                let Some(entry) = self.exposed.get_mut(reference) else {
                    continue;
                };
                let index = match entry.buffer_index {
                    Some(index) => index,
                    None => {
                        let index = self.references.len();
                        entry.buffer_index = Some(index);
                        self.references.push(*reference);
                        self.values.push(entry.last_value.clone());
                        index
                    }
                };
                self.values[index] = modifier(self.values[index].clone(), delta_t);
            }
            debug_assert_eq!(self.references.len(), self.values.len());
            self.has_run_modifiers = true;
        }

        if let Some(filter) = filter {
            self.references_filtered.clear();
            self.values_filtered.clear();
            for (reference, value) in self.references.iter().zip(&self.values) {
                if filter(*reference, value) {
                    self.references_filtered.push(*reference);
                    self.values_filtered.push(value.clone());
                }
            }
            return (&self.references_filtered, &self.values_filtered);
        }

        (&self.references, &self.values)
    }

    /// Clear the send buffer and re-arm the modifiers for the next tick.
    pub fn reset(&mut self) {
        for reference in &self.references {
            if let Some(entry) = self.exposed.get_mut(reference) {
                entry.buffer_index = None;
            }
        }
        self.references.clear();
        self.values.clear();
        self.references_filtered.clear();
        self.values_filtered.clear();
        self.has_run_modifiers = false;
    }

    /// The last value set (or seeded) for an exposed variable.
    pub fn last_value(&self, reference: ValueReference) -> Result<&T, CacheError> {
        self.exposed
            .get(&reference)
            .map(|e| &e.last_value)
            .ok_or(CacheError::NotExposed(reference))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(nanos: i64) -> Duration {
        Duration::from_nanos(nanos)
    }

    // -----------------------------------------------------------------------
    // GetCache
    // -----------------------------------------------------------------------

    #[test]
    fn get_cache_expose_is_idempotent_and_zero_initialised() {
        let mut cache: GetCache<f64> = GetCache::new();
        cache.expose(3);
        cache.expose(3);
        assert_eq!(cache.references(), &[3]);
        assert_eq!(*cache.get(3).unwrap(), 0.0);
    }

    #[test]
    fn get_cache_unexposed_reference_fails() {
        let cache: GetCache<i32> = GetCache::new();
        assert!(matches!(cache.get(7), Err(CacheError::NotExposed(7))));
    }

    #[test]
    fn get_cache_passthrough_without_modifier() {
        let mut cache: GetCache<f64> = GetCache::new();
        cache.expose(0);
        cache.original_values_mut()[0] = 1.5;
        cache.run_modifiers(dt(0));
        assert_eq!(*cache.get(0).unwrap(), 1.5);
    }

    #[test]
    fn get_cache_applies_and_clears_modifier() {
        let mut cache: GetCache<f64> = GetCache::new();
        cache.expose(0);
        cache
            .set_modifier(0, Some(Box::new(|v, _| v + 10.0)))
            .unwrap();
        cache.original_values_mut()[0] = 1.0;
        cache.run_modifiers(dt(0));
        assert_eq!(*cache.get(0).unwrap(), 11.0);

        cache.set_modifier(0, None).unwrap();
        cache.run_modifiers(dt(0));
        assert_eq!(*cache.get(0).unwrap(), 1.0);
    }

    #[test]
    fn get_cache_modifier_sees_delta_t() {
        let mut cache: GetCache<f64> = GetCache::new();
        cache.expose(0);
        cache
            .set_modifier(0, Some(Box::new(|v, d| v + d.as_nanos() as f64)))
            .unwrap();
        cache.original_values_mut()[0] = 1.0;
        cache.run_modifiers(dt(5));
        assert_eq!(*cache.get(0).unwrap(), 6.0);
    }

    // -----------------------------------------------------------------------
    // SetCache
    // -----------------------------------------------------------------------

    #[test]
    fn set_cache_round_trip_without_modifier() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(1, 0.0);
        cache.set_value(1, 2.5).unwrap();
        let (refs, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(refs, &[1]);
        assert_eq!(values, &[2.5]);
    }

    #[test]
    fn set_cache_round_trip_with_modifier() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(1, 0.0);
        cache
            .set_modifier(1, Some(Box::new(|v, _| v * 2.0)))
            .unwrap();
        cache.set_value(1, 3.0).unwrap();
        let (_, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(values, &[6.0]);
    }

    #[test]
    fn set_cache_repeated_set_overwrites_slot() {
        let mut cache: SetCache<i32> = SetCache::new();
        cache.expose(0, 0);
        cache.set_value(0, 1).unwrap();
        cache.set_value(0, 2).unwrap();
        cache.set_value(0, 3).unwrap();
        let (refs, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(refs.len(), 1);
        assert_eq!(values, &[3]);
    }

    #[test]
    fn set_cache_modify_and_get_is_idempotent() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(0, 0.0);
        cache
            .set_modifier(0, Some(Box::new(|v, _| v + 1.0)))
            .unwrap();
        cache.set_value(0, 1.0).unwrap();
        let first: Vec<f64> = cache.modify_and_get(dt(0), None).1.to_vec();
        let second: Vec<f64> = cache.modify_and_get(dt(0), None).1.to_vec();
        assert_eq!(first, vec![2.0]);
        assert_eq!(first, second);
    }

    #[test]
    fn set_cache_rejects_set_after_modifiers_ran() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(0, 0.0);
        cache.modify_and_get(dt(0), None);
        assert!(matches!(
            cache.set_value(0, 1.0),
            Err(CacheError::ModifiersAlreadyRun)
        ));
    }

    #[test]
    fn set_cache_reset_rearms_the_tick() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(0, 0.0);
        cache.set_value(0, 1.0).unwrap();
        cache.modify_and_get(dt(0), None);
        cache.reset();

        // Buffer is empty again and writes are accepted.
        let (refs, _) = cache.modify_and_get(dt(0), None);
        assert!(refs.is_empty());
        cache.reset();
        cache.set_value(0, 2.0).unwrap();
        let (_, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(values, &[2.0]);
    }

    #[test]
    fn set_cache_modifier_ensures_buffer_presence_each_tick() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(0, 4.0);
        cache
            .set_modifier(0, Some(Box::new(|_, _| 9.0)))
            .unwrap();

        // Nothing was written, but the modifier must still run.
        let (refs, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(refs, &[0]);
        assert_eq!(values, &[9.0]);
        cache.reset();

        // And again on the next tick, without another set_modifier call.
        let (refs, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(refs, &[0]);
        assert_eq!(values, &[9.0]);
    }

    #[test]
    fn set_cache_modifiers_apply_in_insertion_order() {
        let mut cache: SetCache<String> = SetCache::new();
        cache.expose(0, String::new());
        cache.expose(1, String::new());
        cache
            .set_modifier(1, Some(Box::new(|v, _| v + "b")))
            .unwrap();
        cache
            .set_modifier(0, Some(Box::new(|v, _| v + "a")))
            .unwrap();
        let (refs, values) = cache.modify_and_get(dt(0), None);
        // Buffer slots were claimed in set_modifier order.
        assert_eq!(refs, &[1, 0]);
        assert_eq!(values, &["b".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn set_cache_filter_limits_output_only() {
        let mut cache: SetCache<i32> = SetCache::new();
        cache.expose(0, 0);
        cache.expose(1, 0);
        cache.set_value(0, 10).unwrap();
        cache.set_value(1, 20).unwrap();
        let (refs, values) = cache.modify_and_get(dt(0), Some(&|r, _| r == 1));
        assert_eq!(refs, &[1]);
        assert_eq!(values, &[20]);

        // The unfiltered buffer is unchanged.
        let (refs, values) = cache.modify_and_get(dt(0), None);
        assert_eq!(refs, &[0, 1]);
        assert_eq!(values, &[10, 20]);
    }

    #[test]
    fn set_cache_unexposed_reference_fails() {
        let mut cache: SetCache<bool> = SetCache::new();
        assert!(matches!(
            cache.set_value(5, true),
            Err(CacheError::NotExposed(5))
        ));
        assert!(matches!(
            cache.set_modifier(5, None),
            Err(CacheError::NotExposed(5))
        ));
    }

    #[test]
    fn set_cache_last_value_tracks_sets_across_resets() {
        let mut cache: SetCache<f64> = SetCache::new();
        cache.expose(0, 1.5);
        assert_eq!(*cache.last_value(0).unwrap(), 1.5);
        cache.set_value(0, 2.5).unwrap();
        cache.modify_and_get(dt(0), None);
        cache.reset();
        assert_eq!(*cache.last_value(0).unwrap(), 2.5);
    }
}
