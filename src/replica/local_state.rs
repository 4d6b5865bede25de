use crate::replica::peers::ReplicaId;
use std::fmt;

#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub(crate) struct Term(u64);

impl Term {
    pub(crate) fn new(term: u64) -> Self {
        Term(term)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LocalState holds `currentTerm` and `votedFor`. Every mutation here must be followed by
/// persisting the replica state before anyone outside the replica can observe the change.
///
/// Store methods are written CAS style: they return true iff they mutated state.
pub(crate) struct LocalState {
    current_term: Term,
    voted_for_this_term: Option<ReplicaId>,
    my_replica_id: ReplicaId,
}

impl LocalState {
    pub(crate) fn new(my_replica_id: ReplicaId) -> Self {
        Self::restore(my_replica_id, Term::new(0), None)
    }

    pub(crate) fn restore(my_replica_id: ReplicaId, current_term: Term, voted_for: Option<ReplicaId>) -> Self {
        LocalState {
            current_term,
            voted_for_this_term: voted_for,
            my_replica_id,
        }
    }

    /// Set current term to `new_term` iff it is larger than current term. Clears the vote.
    pub(crate) fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            false
        } else {
            self.current_term = new_term;
            self.voted_for_this_term = None;
            true
        }
    }

    /// Store our vote iff `expected_term` is the current term and we either have not voted this
    /// term or already voted for the same candidate.
    pub(crate) fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: &ReplicaId) -> bool {
        if expected_term != self.current_term {
            return false;
        }

        match &self.voted_for_this_term {
            None => {
                self.voted_for_this_term.replace(vote.clone());
                true
            }
            Some(existing) => existing == vote,
        }
    }

    /// Return the new term. Used when transitioning to candidate.
    pub(crate) fn increment_term_and_vote_for_self(&mut self) -> Term {
        self.current_term.incr();
        self.voted_for_this_term.replace(self.my_replica_id.clone());

        self.current_term
    }

    pub(crate) fn current_term(&self) -> Term {
        self.current_term
    }

    pub(crate) fn voted_for_current_term(&self) -> (Term, Option<&ReplicaId>) {
        (self.current_term, self.voted_for_this_term.as_ref())
    }
}
