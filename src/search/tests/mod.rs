//! Scenario tests for the search core: beam behavior, the frame loop,
//! grammar-loop termination and the fast-match lookahead pass.
