use fxhash::FxHashMap;
use log::trace;

use crate::{Barrier, Command, CommandList, ResourceId};

/// How a resource is about to be accessed; changing it requires a barrier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResourceState {
    #[default]
    Undefined,
    ShaderRead,
    ShaderWrite,
    TransferSrc,
    TransferDst,
    IndirectArgs,
}

impl ResourceState {
    pub fn is_write(self) -> bool {
        matches!(self, Self::ShaderWrite | Self::TransferDst)
    }
}

/// Remembers the last known state of each resource and records barriers
/// when (and only when) a resource has to change it.
///
/// Two consecutive writes count as a change too - storage writes from
/// separate passes must be ordered even though the layout stays the same.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: FxHashMap<ResourceId, ResourceState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, resource: impl Into<ResourceId>) -> ResourceState {
        self.states
            .get(&resource.into())
            .copied()
            .unwrap_or_default()
    }

    /// Transitions resource into given state, recording a barrier if needed;
    /// returns whether a barrier got recorded.
    pub fn transition(
        &mut self,
        commands: &mut CommandList,
        resource: impl Into<ResourceId>,
        state: ResourceState,
    ) -> bool {
        let resource = resource.into();
        let before = self.state(resource);

        if before == state && !state.is_write() {
            return false;
        }

        trace!("Barrier on {resource}: {before:?} -> {state:?}");

        commands.push(Command::Barrier(Barrier {
            resource,
            before,
            after: state,
        }));

        self.states.insert(resource, state);

        true
    }

    /// Overrides the known state of a resource without recording anything;
    /// used for resources written outside of our command lists (e.g. the
    /// signal produced by the ray tracer).
    pub fn assume(
        &mut self,
        resource: impl Into<ResourceId>,
        state: ResourceState,
    ) {
        self.states.insert(resource.into(), state);
    }

    pub fn forget(&mut self, resource: impl Into<ResourceId>) {
        self.states.remove(&resource.into());
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }
}
