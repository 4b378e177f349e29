//! Conversations module - aggregate, persistence contract and service.

mod conversations_model;
mod conversations_service;
mod conversations_traits;
mod in_memory_repository;

pub use conversations_model::*;
pub use conversations_service::ConversationService;
pub use conversations_traits::*;
pub use in_memory_repository::InMemoryChatRepository;
