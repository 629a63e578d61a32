//! The ordered list of active layers.

use crate::context::ConnectionContext;
use crate::hint::Hint;
use crate::layer::{Chunk, LayerResult, ProtocolLayer};
use crate::Error;

/// An ordered list of active layers, top first (e.g. Fragment → Record →
/// Transport, or QuicFrame → QuicPacket → Transport).
///
/// Configurations are dispatched top-down for sending and bottom-up for
/// receiving. Layers reach their neighbor below through a [`Lower`]
/// cursor over the tail of the list; there is no inheritance and no
/// global registry.
pub struct LayerStack {
    layers: Vec<Box<dyn ProtocolLayer>>,
}

impl LayerStack {
    pub fn new(layers: Vec<Box<dyn ProtocolLayer>>) -> Self {
        LayerStack { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The layer at `index` (0 is the top).
    pub fn layer(&self, index: usize) -> &dyn ProtocolLayer {
        &*self.layers[index]
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut (dyn ProtocolLayer + 'static) {
        &mut *self.layers[index]
    }

    /// Send every configured container, dispatching layers top-down.
    ///
    /// Returns one result per layer that had a configuration, in
    /// dispatch order.
    pub fn send_configuration(
        &mut self,
        ctx: &mut ConnectionContext,
    ) -> Result<Vec<LayerResult>, Error> {
        let mut results = Vec::new();
        for index in 0..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(index + 1);
            let layer = &mut head[index];
            if !layer.core().has_configuration() {
                continue;
            }
            let mut lower = Lower::new(tail);
            layer.send_configuration(ctx, &mut lower)?;
            results.push(layer.core_mut().take_result());
        }
        Ok(results)
    }

    /// Push raw bytes into the top layer.
    pub fn send_data(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        data: &[u8],
    ) -> Result<(), Error> {
        let (head, tail) = self
            .layers
            .split_first_mut()
            .ok_or(Error::EndOfStack)?;
        let mut lower = Lower::new(tail);
        head.send_data(ctx, hint, data, &mut lower)
    }

    /// Receive until every configured layer's policy resolves, dispatching
    /// layers bottom-up so lower layers buffer data for the ones above.
    ///
    /// Returns one result per layer that had a configuration, top first.
    pub fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
    ) -> Result<Vec<LayerResult>, Error> {
        let mut results = Vec::new();
        for index in (0..self.layers.len()).rev() {
            let (head, tail) = self.layers.split_at_mut(index + 1);
            let layer = &mut head[index];
            if !layer.core().has_configuration() {
                continue;
            }
            let mut lower = Lower::new(tail);
            layer.receive_data(ctx, &mut lower)?;
            results.push(layer.core_mut().take_result());
        }
        results.reverse();
        Ok(results)
    }
}

/// Cursor over the layers below one position in the stack.
///
/// The head of the slice is the immediate neighbor; its own lower layers
/// are the tail. This is how inter-layer calls traverse the stack without
/// any layer holding a reference to another.
pub struct Lower<'a> {
    layers: &'a mut [Box<dyn ProtocolLayer>],
}

impl<'a> Lower<'a> {
    pub fn new(layers: &'a mut [Box<dyn ProtocolLayer>]) -> Self {
        Lower { layers }
    }

    /// Whether there is any layer below.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Push bytes into the neighbor below.
    pub fn send_data(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        data: &[u8],
    ) -> Result<(), Error> {
        let (head, tail) = self.layers.split_first_mut().ok_or(Error::EndOfStack)?;
        let mut lower = Lower::new(tail);
        head.send_data(ctx, hint, data, &mut lower)
    }

    /// Ask the neighbor below for the next chunk matching `hint`.
    pub fn receive_more_for_hint(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
    ) -> Result<Option<Chunk>, Error> {
        let (head, tail) = self.layers.split_first_mut().ok_or(Error::EndOfStack)?;
        let mut lower = Lower::new(tail);
        head.receive_more_for_hint(ctx, hint, &mut lower)
    }
}
