// Test modules for Protrans
// Each module contains the unit tests for the corresponding source module

mod config_tests;
