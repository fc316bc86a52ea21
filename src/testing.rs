// ============================================================================
// src/testing.rs – Scripted runner and mount table for unit tests
// ============================================================================

use crate::cmd::{Runner, Tool};
use crate::error::ImageResult;
use crate::mounts::MountTable;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Mount table whose contents follow the `FakeRunner`'s mount/umount calls.
#[derive(Clone, Default)]
pub struct FakeMounts {
    mounted: Rc<RefCell<BTreeSet<PathBuf>>>,
}

impl FakeMounts {
    /// Pretend something outside the pipeline mounted `path`.
    pub fn premount(&self, path: &Path) {
        self.mounted.borrow_mut().insert(path.to_path_buf());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.mounted.borrow().contains(path)
    }
}

impl MountTable for FakeMounts {
    fn snapshot(&self) -> ImageResult<BTreeMap<PathBuf, String>> {
        Ok(self
            .mounted
            .borrow()
            .iter()
            .map(|p| (p.clone(), "/dev/loop0".to_string()))
            .collect())
    }
}

/// Records every invocation and answers with queued exit codes (0 once the
/// queue for a tool runs dry). Successful `mount`/`umount` calls update the
/// linked `FakeMounts`.
pub struct FakeRunner {
    calls: RefCell<Vec<(Tool, Vec<String>)>>,
    script: RefCell<HashMap<Tool, VecDeque<i32>>>,
    mounts: FakeMounts,
}

impl FakeRunner {
    pub fn new(mounts: &FakeMounts) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            script: RefCell::new(HashMap::new()),
            mounts: mounts.clone(),
        }
    }

    /// Queue exit codes for successive invocations of `tool`.
    pub fn script(&self, tool: Tool, codes: &[i32]) {
        self.script
            .borrow_mut()
            .entry(tool)
            .or_default()
            .extend(codes.iter().copied());
    }

    pub fn calls(&self) -> Vec<(Tool, Vec<String>)> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, tool: Tool) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(t, _)| *t == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn count(&self, tool: Tool) -> usize {
        self.calls_to(tool).len()
    }

    /// Tools in invocation order.
    pub fn sequence(&self) -> Vec<Tool> {
        self.calls.borrow().iter().map(|(t, _)| *t).collect()
    }
}

impl Runner for FakeRunner {
    fn status(&self, tool: Tool, args: &[String]) -> ImageResult<i32> {
        self.calls.borrow_mut().push((tool, args.to_vec()));
        let code = self
            .script
            .borrow_mut()
            .get_mut(&tool)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0);

        if code == 0 {
            if let Some(target) = args.last().map(PathBuf::from) {
                match tool {
                    Tool::Mount => {
                        self.mounts.mounted.borrow_mut().insert(target);
                    }
                    Tool::Umount => {
                        self.mounts.mounted.borrow_mut().remove(&target);
                    }
                    _ => {}
                }
            }
        }
        Ok(code)
    }
}
