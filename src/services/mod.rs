pub mod gateway_service;
