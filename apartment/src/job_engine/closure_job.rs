// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::borrow::Cow;

use crate::job_engine::job::Job;

pub struct ClosureJob {
    desc: Cow<'static, str>,
    task: Box<dyn FnOnce() + Send + 'static>,
}

impl ClosureJob {
    pub fn new(desc: impl Into<Cow<'static, str>>, f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            desc: desc.into(),
            task: Box::new(f),
        }
    }
}

impl Job for ClosureJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn execute(self: Box<Self>) {
        (self.task)()
    }
}
