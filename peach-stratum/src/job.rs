//! The unit of work a pool hands out: a `mining.notify` projected into a
//! fixed record, plus the sequence number that makes job freshness
//! structural rather than semantic (§ job_seq in the client's handoff).

use peach_core::BTrailer;

pub const JOB_ID_MAX_LEN: usize = 63;

#[derive(Debug, Clone)]
pub struct StratumJob {
    pub job_id: String,
    pub phash: [u8; 32],
    pub bnum: [u8; 8],
    pub difficulty: u8,
    pub time0: u32,
    pub mroot: [u8; 32],
    pub valid: bool,
    pub job_seq: u64,
}

impl Default for StratumJob {
    fn default() -> Self {
        StratumJob {
            job_id: String::new(),
            phash: [0; 32],
            bnum: [0; 8],
            difficulty: 0,
            time0: 0,
            mroot: [0; 32],
            valid: false,
            job_seq: 0,
        }
    }
}

impl StratumJob {
    /// Project this job into a `BTRAILER`: phash, bnum, mroot, difficulty
    /// byte 0, and time0, the same fields the reference client's job
    /// handoff fills in.
    pub fn to_btrailer(&self) -> BTrailer {
        let mut t = BTrailer::default();
        t.phash = self.phash;
        t.bnum = self.bnum;
        t.mroot = self.mroot;
        t.difficulty[0] = self.difficulty;
        t.set_time0(self.time0);
        t
    }
}
