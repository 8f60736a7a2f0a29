mod failure_test;
mod one_to_many_test;
mod one_to_one_test;
mod run_tracking_test;
mod strategy_equivalence_test;
