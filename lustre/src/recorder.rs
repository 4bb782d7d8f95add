use crate::{Command, CommandList, ResourceId, ResourceState, StateTracker};

/// Appends commands to a list, keeping the resource-state tracker in sync so
/// that every pass only has to declare how it's going to use its resources.
pub struct Recorder<'a> {
    tracker: &'a mut StateTracker,
    commands: &'a mut CommandList,
}

impl<'a> Recorder<'a> {
    pub fn new(
        tracker: &'a mut StateTracker,
        commands: &'a mut CommandList,
    ) -> Self {
        Self { tracker, commands }
    }

    pub fn transition(
        &mut self,
        resource: impl Into<ResourceId>,
        state: ResourceState,
    ) -> bool {
        self.tracker.transition(self.commands, resource, state)
    }

    pub fn reads<const N: usize>(&mut self, resources: [ResourceId; N]) {
        for resource in resources {
            self.transition(resource, ResourceState::ShaderRead);
        }
    }

    pub fn writes<const N: usize>(&mut self, resources: [ResourceId; N]) {
        for resource in resources {
            self.transition(resource, ResourceState::ShaderWrite);
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn tracker(&mut self) -> &mut StateTracker {
        self.tracker
    }
}
