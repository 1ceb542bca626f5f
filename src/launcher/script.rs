//! Dedicated server start script

use crate::types::Match;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPlayer {
    pub id: usize,
    pub name: String,
    pub password: String,
    pub team: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTeam {
    pub id: i64,
    pub ally_team: i64,
    /// Index of the first player seated on the team
    pub leader: usize,
}

/// Everything the dedicated server needs to host one match
#[derive(Debug, Clone)]
pub struct StartScript {
    pub host_ip: String,
    pub port: u16,
    pub autohost_port: u16,
    pub game: String,
    pub map: String,
    pub engine: String,
    pub players: Vec<ScriptPlayer>,
    pub teams: BTreeMap<i64, ScriptTeam>,
    pub ally_teams: Vec<i64>,
}

impl StartScript {
    /// Seat the match's players. `password` is called once per player.
    ///
    /// A team's ally team is taken from its first player; later players who
    /// disagree are coerced onto the team's ally team.
    pub fn build(
        matched: &Match,
        host_ip: &str,
        port: u16,
        autohost_port: u16,
        mut password: impl FnMut() -> String,
    ) -> Self {
        let mut players = Vec::with_capacity(matched.players.len());
        let mut teams: BTreeMap<i64, ScriptTeam> = BTreeMap::new();
        let mut ally_teams = Vec::new();

        for (id, seat) in matched.players.iter().enumerate() {
            players.push(ScriptPlayer {
                id,
                name: seat.name.clone(),
                password: password(),
                team: seat.team,
            });

            match teams.get(&seat.team) {
                Some(team) if team.ally_team != seat.ally => {
                    warn!(
                        "Match {} in {}: player {} wants ally team {} but team {} is on {}, coercing",
                        matched.id, matched.queue_name, seat.name, seat.ally, team.id, team.ally_team
                    );
                }
                Some(_) => {}
                None => {
                    teams.insert(
                        seat.team,
                        ScriptTeam {
                            id: seat.team,
                            ally_team: seat.ally,
                            leader: id,
                        },
                    );
                    if !ally_teams.contains(&seat.ally) {
                        ally_teams.push(seat.ally);
                    }
                }
            }
        }
        ally_teams.sort_unstable();

        Self {
            host_ip: host_ip.to_string(),
            port,
            autohost_port,
            game: matched.game.clone(),
            map: matched.map.clone(),
            engine: matched.engine_version.clone(),
            players,
            teams,
            ally_teams,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "[game]")?;
        writeln!(out, "{{")?;
        writeln!(out, "\tAutoHostIP=127.0.0.1;")?;
        writeln!(out, "\tAutoHostPort={};", self.autohost_port)?;
        writeln!(out, "\tGameType={};", self.game)?;
        writeln!(out, "\tHostIP=;")?;
        writeln!(out, "\tHostPort={};", self.port)?;
        writeln!(out, "\tIsHost=1;")?;
        writeln!(out, "\tMapName={};", self.map)?;
        writeln!(out, "\tOnlyLocal=0;")?;
        writeln!(out, "\tStartPosType=1;")?;

        for ally_team in &self.ally_teams {
            writeln!(out, "\t[allyteam{}]", ally_team)?;
            writeln!(out, "\t{{")?;
            writeln!(out, "\t\tNumAllies=0;")?;
            writeln!(out, "\t}}")?;
        }

        for player in &self.players {
            writeln!(out, "\t[player{}]", player.id)?;
            writeln!(out, "\t{{")?;
            writeln!(out, "\t\tname={};", player.name)?;
            writeln!(out, "\t\tpassword={};", player.password)?;
            writeln!(out, "\t\tteam={};", player.team)?;
            writeln!(out, "\t}}")?;
        }

        for team in self.teams.values() {
            writeln!(out, "\t[team{}]", team.id)?;
            writeln!(out, "\t{{")?;
            writeln!(out, "\t\tAllyTeam={};", team.ally_team)?;
            writeln!(out, "\t\tTeamLeader={};", team.leader)?;
            writeln!(out, "\t}}")?;
        }

        write!(out, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchedPlayer;

    fn seat(name: &str, team: i64, ally: i64) -> MatchedPlayer {
        MatchedPlayer {
            name: name.to_string(),
            team,
            ally,
        }
    }

    fn matched(players: Vec<MatchedPlayer>) -> Match {
        Match {
            id: 7,
            queue_name: "2v2".to_string(),
            queue_instance: uuid::Uuid::nil(),
            game: "BA".to_string(),
            map: "DeltaSiegeDry".to_string(),
            engine_version: "103.0".to_string(),
            players,
        }
    }

    #[test]
    fn test_duel_script() {
        let m = matched(vec![seat("A", 0, 0), seat("B", 1, 1)]);
        let script = StartScript::build(&m, "10.0.0.1", 8452, 8453, || "pw".to_string());

        assert_eq!(script.teams.len(), 2);
        assert_eq!(script.ally_teams, vec![0, 1]);

        let text = script.render();
        assert!(text.starts_with("[game]\n{\n"));
        assert!(text.contains("\tHostPort=8452;\n"));
        assert!(text.contains("\tAutoHostPort=8453;\n"));
        assert!(text.contains("\tMapName=DeltaSiegeDry;\n"));
        assert!(text.contains("\t[player1]\n\t{\n\t\tname=B;\n\t\tpassword=pw;\n\t\tteam=1;\n\t}\n"));
        assert!(text.contains("\t[team1]\n\t{\n\t\tAllyTeam=1;\n\t\tTeamLeader=1;\n\t}\n"));
        assert!(text.contains("\t[allyteam0]\n\t{\n\t\tNumAllies=0;\n\t}\n"));
        assert!(text.ends_with('}'));
    }

    #[test]
    fn test_shared_team_uses_first_player_as_leader() {
        let m = matched(vec![seat("A", 0, 0), seat("B", 0, 0), seat("C", 1, 1)]);
        let script = StartScript::build(&m, "127.0.0.1", 1, 2, || "pw".to_string());

        assert_eq!(script.players.len(), 3);
        assert_eq!(script.teams[&0].leader, 0);
        assert_eq!(script.teams[&1].leader, 2);
    }

    #[test]
    fn test_ally_mismatch_is_coerced() {
        let m = matched(vec![seat("A", 0, 0), seat("B", 0, 5)]);
        let script = StartScript::build(&m, "127.0.0.1", 1, 2, || "pw".to_string());

        assert_eq!(script.teams[&0].ally_team, 0);
        assert_eq!(script.ally_teams, vec![0]);
    }

    #[test]
    fn test_each_player_gets_own_password() {
        let m = matched(vec![seat("A", 0, 0), seat("B", 1, 1)]);
        let mut n = 0;
        let script = StartScript::build(&m, "127.0.0.1", 1, 2, || {
            n += 1;
            format!("pw{}", n)
        });
        assert_eq!(script.players[0].password, "pw1");
        assert_eq!(script.players[1].password, "pw2");
    }
}
