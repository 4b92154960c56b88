mod harness;
use harness::*;

mod dispatch;
mod e2e;
mod history;
mod report;
