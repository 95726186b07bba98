//! Integration tests for `src/executor/`.

#[path = "executor/docker_invariants_test.rs"]
mod docker_invariants_test;
#[path = "executor/egress_test.rs"]
mod egress_test;
#[path = "executor/redactor_test.rs"]
mod redactor_test;
#[path = "executor/shell_escape_test.rs"]
mod shell_escape_test;
