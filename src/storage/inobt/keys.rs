use super::block::NodeMut;
use super::cursor::Cursor;
use crate::types::{AgIno, InobtError, Result};

impl<'a> Cursor<'a> {
    /// Rewrites the separator for the cursor's path starting at
    /// `start_level`, climbing only while the slot just written is the first
    /// in its block.
    pub(crate) fn update_key(&self, key: AgIno, start_level: usize) -> Result<()> {
        let geo = *self.geo();
        let mut level = start_level;
        while level < self.height() {
            let slot = self.slot(level);
            let buf = self.buf(level)?;
            {
                let mut data = buf.write();
                let mut node = NodeMut::new(&mut data, &geo);
                if slot == 0 || slot > node.view().numrecs() {
                    return Err(InobtError::Corruption("key update slot outside its block"));
                }
                node.set_key(slot, key);
            }
            self.log_entries(&buf, level, slot, slot);
            if slot != 1 {
                break;
            }
            level += 1;
        }
        Ok(())
    }
}
