//! Workspace-level integration tests for the vab bridge live in `tests/`.
