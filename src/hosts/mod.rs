//! Host configurations, grouping rules, and the persistent registry

mod host;
mod registry;
mod sections;

pub use host::{ConnectionKind, EngineKind, HostConfig};
pub use registry::{HostEvent, HostRegistry};
pub use sections::{MatchKind, Section, SectionMatcher, SectionRule};
