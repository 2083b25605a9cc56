pub mod health_handlers;
