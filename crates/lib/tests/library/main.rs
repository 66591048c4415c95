mod common;
mod lambda_gateway_tests;
mod reconcile_tests;
