pub mod pool_generator;
