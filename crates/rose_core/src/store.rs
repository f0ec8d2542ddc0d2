//! Neuron Store: exclusive owner of every live neuron.
//!
//! Neurons are created on first observation and removed only when the
//! extraction layer reports the element gone. There is no implicit eviction.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::neuron::{ElementId, Neuron};

#[derive(Debug, Clone, Default)]
pub struct NeuronStore {
    neurons: BTreeMap<ElementId, Neuron>,
}

impl NeuronStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing neuron for `id`, or a freshly initialized one.
    pub fn get_or_create(&mut self, id: &str) -> &mut Neuron {
        self.neurons
            .entry(ElementId::from(id))
            .or_insert_with(|| Neuron::new(id))
    }

    pub fn get(&self, id: &str) -> Option<&Neuron> {
        self.neurons.get(id)
    }

    /// Drop all state for `id`. Returns the removed neuron, if any.
    pub fn remove(&mut self, id: &str) -> Option<Neuron> {
        self.neurons.remove(id)
    }

    /// Live neurons in identity order.
    pub fn all(&self) -> impl Iterator<Item = &Neuron> {
        self.neurons.values()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.neurons.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    /// Replace the stored state with the output of a completed cycle.
    pub(crate) fn commit(&mut self, neuron: Neuron) {
        self.neurons.insert(ElementId::from(neuron.id()), neuron);
    }

    /// Commit a whole tick's worth of neurons at once.
    pub(crate) fn commit_all(&mut self, neurons: Vec<Neuron>) {
        for n in neurons {
            self.commit(n);
        }
    }
}
