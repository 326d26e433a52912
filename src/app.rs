use crate::channels::ChannelRegistry;
use crate::config::ChannelConfig;
use crate::eventsub;
use crate::helix::{Helix, HttpClient};
use crate::session::{ConnectionMachine, ConnectionState, Timing};
use crate::transport::Transport;
use crate::views::Renderer;

/// Everything the control loop owns between ticks.
pub struct App {
    registry: ChannelRegistry,
    machine: ConnectionMachine,
}

impl App {
    pub fn new(channels: &[ChannelConfig], visible_slots: usize, timing: Timing) -> Self {
        Self {
            registry: ChannelRegistry::new(channels, visible_slots),
            machine: ConnectionMachine::new(timing),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ChannelRegistry {
        &mut self.registry
    }

    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn request_refresh(&mut self) {
        self.machine.request_refresh();
    }

    /// One loop iteration: deliver pending transport events, then advance the
    /// state machine. Returns the state after the tick.
    pub fn tick<T, C>(
        &mut self,
        now: u32,
        transport: &mut T,
        helix: &mut Helix<C>,
        renderer: &mut dyn Renderer,
    ) -> ConnectionState
    where
        T: Transport + ?Sized,
        C: HttpClient,
    {
        let Self { registry, machine } = self;
        transport.drive(&mut |event| eventsub::dispatch(event, now, machine, registry, renderer));
        machine.step(now, transport, helix, registry, renderer);
        machine.state()
    }

    pub fn status_line(&self) -> String {
        let live: Vec<&str> = self
            .registry
            .channels()
            .filter(|c| c.is_live())
            .map(|c| c.name())
            .collect();
        format!(
            "state={} attempts={} session={} subs={} live=[{}] titles_pending={}",
            self.machine.state(),
            self.machine.attempts(),
            self.machine.session().id().unwrap_or("-"),
            self.machine.session().subscribed_count(),
            live.join(","),
            self.registry.pending_title_count(),
        )
    }
}
