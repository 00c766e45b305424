pub mod execution_provider;
