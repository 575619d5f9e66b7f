mod message_history_service;

pub use message_history_service::MessageHistoryService;
