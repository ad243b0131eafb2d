pub mod bid;
pub mod leaderboard;
