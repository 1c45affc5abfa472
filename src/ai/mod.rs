mod agent;
mod gateway;

pub use agent::AgentGateway;
pub use gateway::{
    GeneratedMessage, GenerationGateway, GroupedCommit, GroupedHunk, GroupingRequest,
    GroupingResult, OperationSlot, Outcome,
};
