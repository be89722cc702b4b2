mod loader;
mod types;

pub use types::{
    CarrierConfig, CarrierKind, ClientConfig, Config, ListenersConfig, Mm4ListenerConfig,
    NumberConfig, RouteConfig, Settings, SmppListenerConfig, TelemetryConfig,
};
